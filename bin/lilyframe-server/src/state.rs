//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use lilyframe_core::{CommandWrapper, GenerationJob, RequestTracker, ResultStore};

use crate::config::Config;
use crate::frame::FramePages;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// In-memory table of submitted requests.
    pub tracker: RequestTracker,
    /// Spawns background generations that settle tracker entries.
    pub jobs: GenerationJob,
    /// Frame page renderer.
    pub pages: Arc<FramePages>,
}

impl AppState {
    pub fn new(config: Config, wrapper: CommandWrapper) -> Result<Self, minijinja::Error> {
        let tracker = RequestTracker::new(config.eviction);
        let jobs = GenerationJob::new(
            tracker.clone(),
            Arc::new(wrapper),
            ResultStore::new(config.results_dir()),
        );
        let pages = FramePages::new(&config.base_url)?;

        Ok(Self {
            config: Arc::new(config),
            tracker,
            jobs,
            pages: Arc::new(pages),
        })
    }
}
