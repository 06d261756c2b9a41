//! Asynchronous job relay
//!
//! Submits long-running generation and analysis jobs to external backends
//! (ComfyUI, n8n webhooks), polls for their results under per-kind
//! deadlines, normalizes whatever the backend returns, and delivers exactly
//! one result per job.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
