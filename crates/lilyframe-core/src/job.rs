//! Background generation: prompt -> PNG on disk -> tracker status.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::command::{CommandError, CommandWrapper};
use crate::results::{ResultStore, ResultStoreError};
use crate::tracker::{RequestStatus, RequestTracker};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] ResultStoreError),
}

/// Everything a generation task needs, cheap to clone into spawned tasks.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    tracker: RequestTracker,
    wrapper: Arc<CommandWrapper>,
    results: ResultStore,
}

impl GenerationJob {
    pub fn new(tracker: RequestTracker, wrapper: Arc<CommandWrapper>, results: ResultStore) -> Self {
        Self {
            tracker,
            wrapper,
            results,
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Register `prompt` with the tracker and start generating it. Results of
    /// requests evicted to make room are deleted along with their records.
    pub async fn submit(&self, prompt: String) -> String {
        let (id, evicted) = self.tracker.create_evicting(prompt.clone()).await;
        for old in &evicted {
            if let Err(e) = self.results.remove(old).await {
                warn!(request_id = %old, error = %e, "failed to remove evicted result");
            }
        }
        self.spawn(id.clone(), prompt);
        id
    }

    /// Start generating in the background. The outcome is only observable
    /// through the tracker; the handle is returned for tests and may be dropped.
    pub fn spawn(&self, id: String, prompt: String) -> JoinHandle<()> {
        let job = self.clone();
        let span = info_span!("generation", request_id = %id);
        tokio::spawn(async move { job.execute(&id, &prompt).await }.instrument(span))
    }

    /// Run one generation to completion and record the outcome.
    pub async fn execute(&self, id: &str, prompt: &str) {
        let status = match self.generate(id, prompt).await {
            Ok(()) => {
                info!("image generated");
                RequestStatus::Completed
            }
            Err(e) => {
                error!(error = %e, detail = ?e, "error generating image");
                RequestStatus::Error
            }
        };

        if let Err(e) = self.tracker.set_status(id, status).await {
            warn!(error = %e, "failed to record generation outcome");
        }
    }

    async fn generate(&self, id: &str, prompt: &str) -> Result<(), JobError> {
        let png = self.wrapper.run(prompt).await?;
        self.results.write(id, &png).await?;
        Ok(())
    }
}
