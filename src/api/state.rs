//! Application state for the API server

use crate::MediaHarvester;
use std::sync::Arc;

/// Shared state handed to every route handler (cheap Arc clone per request)
#[derive(Clone)]
pub struct AppState {
    /// The harvester serving all operations
    pub harvester: Arc<MediaHarvester>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(harvester: Arc<MediaHarvester>) -> Self {
        Self { harvester }
    }
}
