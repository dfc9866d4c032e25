//! Synchronize one content source into an index location

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{IndexJob, JobStatus};
use crate::checker::{CheckerSettings, StaleSweep, UpdateChecker};
use crate::error::Result;
use crate::location::IndexLocation;
use crate::plugins::AfterActionTask;
use crate::source::{ContentSource, SourceObject};

/// Field names used when writing source objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSettings {
    pub id_attribute: String,
    pub timestamp_attribute: String,
    /// Field tagging documents with the name of their source
    pub term_key: String,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            id_attribute: "contentid".to_string(),
            timestamp_attribute: "updatetimestamp".to_string(),
            term_key: "source".to_string(),
        }
    }
}

/// Counters of one update run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStats {
    pub fetched: usize,
    pub updated: usize,
    pub sweep: StaleSweep,
    pub cancelled: bool,
}

pub struct UpdateCheckerJob {
    identifier: String,
    location: Arc<IndexLocation>,
    source: Arc<dyn ContentSource>,
    settings: UpdateSettings,
    tasks: Vec<Arc<dyn AfterActionTask>>,
    status: JobStatus,
}

impl UpdateCheckerJob {
    pub fn new(
        location: Arc<IndexLocation>,
        source: Arc<dyn ContentSource>,
        settings: UpdateSettings,
        tasks: Vec<Arc<dyn AfterActionTask>>,
    ) -> Self {
        Self {
            identifier: format!("{}:{}", location.name(), source.name()),
            location,
            source,
            settings,
            tasks,
            status: JobStatus::new(),
        }
    }

    fn checker_settings(&self) -> CheckerSettings {
        CheckerSettings {
            term_key: self.settings.term_key.clone(),
            term_value: self.source.name().to_string(),
            id_attribute: self.settings.id_attribute.clone(),
        }
    }

    fn index(&self, cancel: &CancellationToken) -> Result<UpdateStats> {
        let objects = self.source.fetch(cancel)?;
        let mut stats = UpdateStats {
            fetched: objects.len(),
            cancelled: cancel.is_cancelled(),
            ..UpdateStats::default()
        };
        if stats.cancelled {
            tracing::info!("Job {} cancelled while fetching, index left as is", self.identifier);
            return Ok(stats);
        }

        let accessor = self.location.accessor();
        let mut checker = UpdateChecker::new(
            accessor.clone(),
            self.location.reopen_marker().clone(),
            self.checker_settings(),
        );

        let mut outdated: Vec<&SourceObject> = Vec::new();
        for object in &objects {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            if !checker.check_up_to_date(
                &object.identifier,
                object.timestamp.as_deref(),
                &self.settings.timestamp_attribute,
            ) {
                outdated.push(object);
            }
        }

        if !outdated.is_empty() && !stats.cancelled {
            let writer = accessor.writer()?;
            for object in outdated {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    break;
                }
                let doc = object.to_document(
                    &self.settings.id_attribute,
                    &self.settings.timestamp_attribute,
                    &self.settings.term_key,
                    self.source.name(),
                );
                writer.update_document(&self.settings.id_attribute, &object.identifier, doc);
                stats.updated += 1;
                self.status.add_done(1);
            }
            // Commit here so errors surface; the lease drop then has nothing left
            if writer.commit()? {
                self.status.mark_modified();
            }
        }

        if stats.cancelled || cancel.is_cancelled() {
            stats.cancelled = true;
            tracing::info!("Job {} cancelled, skipping stale document removal", self.identifier);
            return Ok(stats);
        }

        stats.sweep = checker.delete_stale_objects();
        if stats.sweep.deleted > 0 {
            self.status.mark_modified();
        }
        Ok(stats)
    }

    fn publish_changes(&self) {
        if let Err(e) = self.location.create_reopen_file() {
            tracing::error!("Cannot create reopen marker for {}: {}", self.location.name(), e);
        }
        if let Err(e) = self.location.accessor().reopen() {
            tracing::error!("Cannot reopen {}: {}", self.location.name(), e);
        }
    }
}

impl IndexJob for UpdateCheckerJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn run(&self, cancel: &CancellationToken) {
        self.status.start();
        tracing::info!("Update check for {} started", self.identifier);

        if let Err(e) = self.location.reopen_check() {
            tracing::warn!("Reopen check for {} failed: {}", self.location.name(), e);
        }

        match self.index(cancel) {
            Ok(stats) => tracing::info!(
                "Update check for {} done: {} fetched, {} updated, {} deleted, {} failed",
                self.identifier,
                stats.fetched,
                stats.updated,
                stats.sweep.deleted,
                stats.sweep.failed
            ),
            Err(e) if e.is_interrupted() => {
                tracing::info!("Update check for {} interrupted: {}", self.identifier, e)
            }
            Err(e) => tracing::error!("Update check for {} failed: {}", self.identifier, e),
        }

        if self.status.is_modified() {
            self.publish_changes();
        }

        for task in &self.tasks {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = task.execute(&self.location, cancel) {
                tracing::error!(
                    "After-action task {} for {} failed: {}",
                    task.name(),
                    self.identifier,
                    e
                );
            }
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
    use crate::source::SourceObject;
    use crate::store::{Analyzer, Document, MemoryDirectory};
    use parking_lot::Mutex;

    /// Source backed by a mutable list
    struct ListSource {
        objects: Mutex<Vec<SourceObject>>,
        /// Cancel this token while fetching
        cancel_on_fetch: Option<CancellationToken>,
    }

    impl ListSource {
        fn new(objects: Vec<SourceObject>) -> Self {
            Self {
                objects: Mutex::new(objects),
                cancel_on_fetch: None,
            }
        }
    }

    impl ContentSource for ListSource {
        fn name(&self) -> &str {
            "list"
        }

        fn fetch(&self, _cancel: &CancellationToken) -> Result<Vec<SourceObject>> {
            if let Some(token) = &self.cancel_on_fetch {
                token.cancel();
            }
            Ok(self.objects.lock().clone())
        }
    }

    fn object(id: &str, ts: &str) -> SourceObject {
        SourceObject::new(id, Some(ts.to_string())).with_attribute("content", "body")
    }

    fn memory_location(docs: Vec<Document>) -> Arc<IndexLocation> {
        let accessor = Arc::new(IndexAccessor::new(
            Arc::new(MemoryDirectory::with_documents(docs)),
            Analyzer::Lowercase,
        ));
        Arc::new(IndexLocation::new("docs", accessor))
    }

    fn indexed_ids(location: &IndexLocation) -> Vec<String> {
        location.accessor().reopen().unwrap();
        let reader = location.accessor().reader(false).unwrap();
        let mut ids: Vec<String> = reader
            .live_docs()
            .into_iter()
            .filter_map(|doc| reader.document(doc).ok()?.get("contentid").map(str::to_string))
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_first_run_indexes_everything() {
        let location = memory_location(Vec::new());
        let source = Arc::new(ListSource::new(vec![object("a", "1"), object("b", "2")]));
        let job = UpdateCheckerJob::new(location.clone(), source, UpdateSettings::default(), Vec::new());

        job.run(&CancellationToken::new());

        assert_eq!(job.identifier(), "docs:list");
        assert!(job.is_modified_index());
        assert_eq!(job.objects_done(), 2);
        assert!(job.finished_at().is_some());
        assert_eq!(indexed_ids(&location), vec!["a", "b"]);
    }

    #[test]
    fn test_second_run_updates_changed_and_removes_stale() {
        let location = memory_location(Vec::new());
        let source = Arc::new(ListSource::new(vec![object("a", "1"), object("b", "2")]));
        UpdateCheckerJob::new(location.clone(), source.clone(), UpdateSettings::default(), Vec::new())
            .run(&CancellationToken::new());

        *source.objects.lock() = vec![object("a", "1"), object("c", "3")];
        let job = UpdateCheckerJob::new(location.clone(), source, UpdateSettings::default(), Vec::new());
        job.run(&CancellationToken::new());

        // Only c was written; b was swept
        assert_eq!(job.objects_done(), 1);
        assert!(job.is_modified_index());
        assert_eq!(indexed_ids(&location), vec!["a", "c"]);
    }

    #[test]
    fn test_unchanged_run_does_not_modify() {
        let location = memory_location(Vec::new());
        let source = Arc::new(ListSource::new(vec![object("a", "1")]));
        UpdateCheckerJob::new(location.clone(), source.clone(), UpdateSettings::default(), Vec::new())
            .run(&CancellationToken::new());

        let job = UpdateCheckerJob::new(location, source, UpdateSettings::default(), Vec::new());
        job.run(&CancellationToken::new());
        assert!(!job.is_modified_index());
        assert_eq!(job.objects_done(), 0);
    }

    #[test]
    fn test_cancelled_run_never_deletes() {
        let location = memory_location(vec![Document::new()
            .with("contentid", "old")
            .with("updatetimestamp", "1")
            .with("source", "list")]);
        let cancel = CancellationToken::new();
        let source = Arc::new(ListSource {
            objects: Mutex::new(vec![object("new", "1")]),
            cancel_on_fetch: Some(cancel.clone()),
        });
        let job = UpdateCheckerJob::new(location.clone(), source, UpdateSettings::default(), Vec::new());

        job.run(&cancel);
        assert!(!job.is_modified_index());
        assert_eq!(indexed_ids(&location), vec!["old"]);
    }

    #[test]
    fn test_cancelled_empty_fetch_never_deletes() {
        let location = memory_location(vec![Document::new()
            .with("contentid", "old")
            .with("updatetimestamp", "1")
            .with("source", "list")]);
        let cancel = CancellationToken::new();
        let source = Arc::new(ListSource {
            objects: Mutex::new(Vec::new()),
            cancel_on_fetch: Some(cancel.clone()),
        });
        let job = UpdateCheckerJob::new(location.clone(), source, UpdateSettings::default(), Vec::new());

        job.run(&cancel);
        assert!(!job.is_modified_index());
        assert_eq!(indexed_ids(&location), vec!["old"]);
    }

    #[test]
    fn test_interrupted_fetch_never_deletes() {
        struct Interrupting;

        impl ContentSource for Interrupting {
            fn name(&self) -> &str {
                "list"
            }

            fn fetch(&self, _cancel: &CancellationToken) -> Result<Vec<SourceObject>> {
                Err(crate::error::IndexError::Interrupted {
                    operation: "fetching source list".to_string(),
                })
            }
        }

        let location = memory_location(vec![Document::new()
            .with("contentid", "old")
            .with("source", "list")]);
        let job = UpdateCheckerJob::new(
            location.clone(),
            Arc::new(Interrupting),
            UpdateSettings::default(),
            Vec::new(),
        );

        job.run(&CancellationToken::new());
        assert!(!job.is_modified_index());
        assert_eq!(indexed_ids(&location), vec!["old"]);
    }

    #[test]
    fn test_other_sources_are_untouched() {
        let location = memory_location(vec![Document::new()
            .with("contentid", "foreign")
            .with("source", "elsewhere")]);
        let source = Arc::new(ListSource::new(vec![object("a", "1")]));
        UpdateCheckerJob::new(location.clone(), source, UpdateSettings::default(), Vec::new())
            .run(&CancellationToken::new());

        assert_eq!(indexed_ids(&location), vec!["a", "foreign"]);
    }
}
