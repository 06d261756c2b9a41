pub mod backend;
pub mod coordinator;
pub mod correlation;
pub mod media;
pub mod normalizer;
pub mod registry;
pub mod results;
pub mod retry;
pub mod scheduler;
pub mod timeout;
