pub mod health;
pub mod jobs;
pub mod media;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// API routes backed by the job engine.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job))
        .route(
            "/api/v1/jobs/{job_id}",
            get(jobs::get_job_status).delete(jobs::cancel_job),
        )
        .route("/api/v1/analyze", post(jobs::analyze_image))
        .route("/api/v1/media", get(media::fetch_media))
        .with_state(state)
}
