use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{IndexJob, JobStatus};
use crate::error::Result;
use crate::location::IndexLocation;

/// Rewrite the index segment through the writer
pub struct OptimizeJob {
    identifier: String,
    location: Arc<IndexLocation>,
    status: JobStatus,
}

impl OptimizeJob {
    pub fn new(location: Arc<IndexLocation>) -> Self {
        Self {
            identifier: format!("{}:optimize", location.name()),
            location,
            status: JobStatus::new(),
        }
    }

    fn optimize(&self) -> Result<()> {
        let writer = self.location.accessor().writer()?;
        writer.optimize();
        if writer.commit()? {
            self.status.add_done(writer.num_docs());
            self.status.mark_modified();
        }
        Ok(())
    }
}

impl IndexJob for OptimizeJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn run(&self, cancel: &CancellationToken) {
        self.status.start();
        if cancel.is_cancelled() {
            self.status.finish();
            return;
        }
        match self.optimize() {
            Ok(()) => tracing::info!("Optimized index {}", self.location.name()),
            Err(e) => tracing::error!("Optimizing {} failed: {}", self.location.name(), e),
        }
        self.status.finish();
    }

    fn status(&self) -> &JobStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::IndexAccessor;
    use crate::store::{Analyzer, Directory, Document, MemoryDirectory};

    #[test]
    fn test_optimize_writes_new_generation() {
        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::with_documents(vec![
            Document::new().with("contentid", "a"),
        ]));
        let accessor = Arc::new(IndexAccessor::new(directory.clone(), Analyzer::Lowercase));
        let job = OptimizeJob::new(Arc::new(IndexLocation::new("docs", accessor.clone())));

        job.run(&CancellationToken::new());
        assert_eq!(job.identifier(), "docs:optimize");
        assert!(job.is_modified_index());
        assert_eq!(job.objects_done(), 1);
        assert_eq!(directory.generation().unwrap(), 2);
        assert_eq!(accessor.writer_use_count(), 0);
    }
}
