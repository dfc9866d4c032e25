use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{IndexJob, JobStatus};
use crate::error::Result;
use crate::location::IndexLocation;

/// Remove every document from an index
pub struct ClearIndexJob {
    identifier: String,
    location: Arc<IndexLocation>,
    status: JobStatus,
}

impl ClearIndexJob {
    pub fn new(location: Arc<IndexLocation>) -> Self {
        Self {
            identifier: format!("{}:clear", location.name()),
            location,
            status: JobStatus::new(),
        }
    }

    fn clear(&self) -> Result<usize> {
        let accessor = self.location.accessor();
        let removed = {
            let writer = accessor.writer()?;
            let removed = writer.delete_all();
            writer.commit()?;
            removed
        };
        self.status.add_done(removed);
        self.status.mark_modified();

        self.location.create_reopen_file()?;
        accessor.reopen()?;
        Ok(removed)
    }
}

impl IndexJob for ClearIndexJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn run(&self, cancel: &CancellationToken) {
        self.status.start();
        if !cancel.is_cancelled() {
            match self.clear() {
                Ok(removed) => tracing::info!(
                    "Cleared index {} ({} documents removed)",
                    self.location.name(),
                    removed
                ),
                Err(e) => tracing::error!("Clearing {} failed: {}", self.location.name(), e),
            }
        }
        self.status.finish();
    }

    fn status(&self) -> &JobStatus {
        &self.status
    }
}
