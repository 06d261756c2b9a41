use std::sync::Arc;

use crate::services::{coordinator::JobCoordinator, media::MediaFetcher, results::ResultStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobCoordinator>,
    pub results: Arc<ResultStore>,
    pub media: Arc<MediaFetcher>,
}

impl AppState {
    pub fn new(engine: JobCoordinator, results: Arc<ResultStore>, media: MediaFetcher) -> Self {
        Self {
            engine: Arc::new(engine),
            results,
            media: Arc::new(media),
        }
    }
}
