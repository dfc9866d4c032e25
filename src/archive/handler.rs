//! Archive triggers: after a modifying batch, or as an after-action task

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{ArchiveOutcome, IndexCompressor};
use crate::error::Result;
use crate::events::{normalize_index_name, Event, EventReceiver, JOBQUEUE_FINISHED};
use crate::location::{IndexLocation, LocationRegistry};
use crate::plugins::{AfterActionTask, COMPRESS_INDEX};

/// Archives its index whenever the index's queue drains a modifying batch.
///
/// Compression runs on its own thread (`IndexCompressor: <index>`) so the
/// queue worker that fired the event is not held up. [`EventReceiver::shutdown`]
/// waits for those threads.
pub struct CompressIndexHandler {
    index_name: String,
    locations: Arc<LocationRegistry>,
    max_temp_age: Duration,
    background: bool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CompressIndexHandler {
    pub fn new(
        index_name: impl Into<String>,
        locations: Arc<LocationRegistry>,
        max_temp_age: Duration,
    ) -> Self {
        let index_name: String = index_name.into();
        Self {
            index_name: normalize_index_name(&index_name).to_string(),
            locations,
            max_temp_age,
            background: true,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Compress on the firing thread instead of a background thread
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Compressor threads started and not yet joined
    pub fn running_workers(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn compress(locations: &LocationRegistry, index: &str, max_temp_age: Duration) {
        let outcome = locations
            .get(index)
            .and_then(|location| IndexCompressor::for_location(&location, max_temp_age))
            .and_then(|compressor| compressor.compress());
        match outcome {
            Ok(ArchiveOutcome::Archived { path, bytes }) => {
                tracing::debug!("Archived {} ({} bytes) to {}", index, bytes, path.display())
            }
            Ok(ArchiveOutcome::InProgress) => {}
            Err(e) if e.is_locked() => {
                tracing::warn!("Cannot archive {} while it is locked: {}", index, e)
            }
            Err(e) => tracing::error!("Archiving {} failed: {}", index, e),
        }
    }
}

impl EventReceiver for CompressIndexHandler {
    fn accepts(&self, event_type: &str) -> bool {
        event_type == JOBQUEUE_FINISHED
    }

    fn process_event(&self, event: &Event) {
        let Event::JobQueueFinished(meta) = event else {
            return;
        };
        if meta.index != self.index_name || !meta.modified {
            return;
        }

        if !self.background {
            Self::compress(&self.locations, &self.index_name, self.max_temp_age);
            return;
        }

        let locations = self.locations.clone();
        let index = self.index_name.clone();
        let max_temp_age = self.max_temp_age;
        let spawned = thread::Builder::new()
            .name(format!("IndexCompressor: {}", index))
            .spawn(move || Self::compress(&locations, &index, max_temp_age));
        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
            }
            Err(e) => tracing::error!("Cannot start compressor for {}: {}", self.index_name, e),
        }
    }

    fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        tracing::info!(
            "Waiting for {} compressor(s) of {}",
            workers.len(),
            self.index_name
        );
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Compressor for {} panicked", self.index_name);
            }
        }
    }
}

/// Archive the index at the end of an update job
#[derive(Debug, Clone)]
pub struct CompressIndexTask {
    max_temp_age: Duration,
}

impl CompressIndexTask {
    pub fn new(max_temp_age: Duration) -> Self {
        Self { max_temp_age }
    }
}

impl AfterActionTask for CompressIndexTask {
    fn name(&self) -> &str {
        COMPRESS_INDEX
    }

    fn execute(&self, location: &Arc<IndexLocation>, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        IndexCompressor::for_location(location, self.max_temp_age)?.compress()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::IndexAccessor;
    use crate::events::JobQueueMetadata;
    use crate::store::{Analyzer, FsDirectory};
    use tempfile::tempdir;

    fn setup(root: &std::path::Path) -> (Arc<LocationRegistry>, Arc<IndexLocation>) {
        let directory = Arc::new(FsDirectory::open(root.join("docs").join("index")).unwrap());
        let location = Arc::new(IndexLocation::new(
            "docs",
            Arc::new(IndexAccessor::new(directory, Analyzer::Lowercase)),
        ));
        let registry = Arc::new(LocationRegistry::new());
        registry.register(location.clone());
        (registry, location)
    }

    fn finished(index: &str, modified: bool) -> Event {
        Event::JobQueueFinished(JobQueueMetadata::new(index, modified))
    }

    #[test]
    fn test_handler_archives_modified_own_index() {
        let tmp = tempdir().unwrap();
        let (registry, location) = setup(tmp.path());
        let handler = CompressIndexHandler::new("index.docs", registry, Duration::from_secs(60))
            .with_background(false);
        let archive = location.archive_paths().unwrap().archive;

        handler.process_event(&finished("docs", false));
        assert!(!archive.exists());
        handler.process_event(&finished("other", true));
        assert!(!archive.exists());

        handler.process_event(&finished("docs", true));
        assert!(archive.exists());
    }

    #[test]
    fn test_handler_only_accepts_finished_events() {
        let handler = CompressIndexHandler::new(
            "docs",
            Arc::new(LocationRegistry::new()),
            Duration::from_secs(60),
        );
        assert!(handler.accepts(JOBQUEUE_FINISHED));
        assert!(!handler.accepts("SOMETHING_ELSE"));
        // Unknown index is logged, not a panic
        handler.with_background(false).process_event(&finished("docs", true));
    }

    #[test]
    fn test_shutdown_joins_background_compressors() {
        let tmp = tempdir().unwrap();
        let (registry, location) = setup(tmp.path());
        let handler = CompressIndexHandler::new("docs", registry, Duration::from_secs(60));
        let paths = location.archive_paths().unwrap();

        handler.process_event(&finished("docs", true));
        handler.shutdown();

        // Nothing is left running or half written once shutdown returns
        assert_eq!(handler.running_workers(), 0);
        assert!(handler.workers.lock().is_empty());
        assert!(paths.archive.exists());
        assert!(!paths.temp.exists());
        assert!(!crate::archive::LockFile::is_locked(
            location.directory_path().unwrap()
        ));
    }

    #[test]
    fn test_task_archives_location() {
        let tmp = tempdir().unwrap();
        let (_registry, location) = setup(tmp.path());
        let task = CompressIndexTask::new(Duration::from_secs(60));

        task.execute(&location, &CancellationToken::new()).unwrap();
        assert!(location.archive_paths().unwrap().archive.exists());
    }
}
