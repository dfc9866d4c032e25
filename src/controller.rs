//! Process-wide context: registries, locations, queues and receivers
//!
//! Everything the indexer shares is owned here and handed out by reference
//! or `Arc`. The controller owns the queues outright; nothing else holds
//! them, so dropping the controller stops every worker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::accessor::{AccessorRegistry, IndexAccessor};
use crate::archive::{ArchiveOutcome, IndexCompressor};
use crate::config::{IndexConfig, IndexerConfig, SourceConfig};
use crate::error::{IndexError, Result};
use crate::events::EventManager;
use crate::jobs::{ClearIndexJob, IndexJob, OptimizeJob, UpdateCheckerJob, UpdateSettings};
use crate::location::{IndexLocation, LocationRegistry};
use crate::plugins::{build_receivers, build_tasks, AfterActionTask, ReceiverContext, TaskContext};
use crate::queue::IndexJobQueue;
use crate::source::{ContentSource, FsContentSource};
use crate::store::{Analyzer, FsDirectory};

/// Suffix of the suggestion location's name
const SUGGESTION_SUFFIX: &str = "-suggest";

/// Per-index wiring that jobs are built from
struct IndexSetup {
    sources: Vec<Arc<dyn ContentSource>>,
    settings: UpdateSettings,
    tasks: Vec<Arc<dyn AfterActionTask>>,
    max_temp_age: Duration,
}

pub struct IndexController {
    accessors: Arc<AccessorRegistry>,
    locations: Arc<LocationRegistry>,
    events: Arc<EventManager>,
    queues: BTreeMap<String, IndexJobQueue>,
    setups: BTreeMap<String, IndexSetup>,
}

impl IndexController {
    pub fn from_config(config: &IndexerConfig) -> Result<Self> {
        config.validate()?;

        let mut controller = Self {
            accessors: Arc::new(AccessorRegistry::new()),
            locations: Arc::new(LocationRegistry::new()),
            events: Arc::new(EventManager::new()),
            queues: BTreeMap::new(),
            setups: BTreeMap::new(),
        };
        for index in &config.indexes {
            controller.add_index(index)?;
        }
        tracing::info!(
            "Configured {} index location(s): {}",
            controller.locations.len(),
            controller.locations.names().join(", ")
        );
        Ok(controller)
    }

    fn open_accessor(
        &self,
        path: &std::path::Path,
        analyzer: Analyzer,
        lock_max_age: Duration,
    ) -> Result<Arc<IndexAccessor>> {
        let directory = Arc::new(FsDirectory::open(path)?);
        let accessor = self.accessors.create_accessor(directory, analyzer)?;
        // The archiver reclaims locks past this age, so writers stop honoring them too
        accessor.set_lock_max_age(lock_max_age);
        Ok(accessor)
    }

    fn add_index(&mut self, index: &IndexConfig) -> Result<()> {
        let max_temp_age = index.archive.max_temp_age();
        let accessor = self.open_accessor(&index.path, index.analyzer, max_temp_age)?;
        let mut location = IndexLocation::new(index.name.clone(), accessor);
        if let Some(path) = &index.suggestion_path {
            let suggestion = IndexLocation::new(
                format!("{}{}", index.name, SUGGESTION_SUFFIX),
                self.open_accessor(path, index.analyzer, max_temp_age)?,
            );
            location = location.with_suggestion(Arc::new(suggestion));
        }
        self.locations.register(Arc::new(location));

        let receivers = build_receivers(
            &index.receivers,
            &ReceiverContext {
                index_name: index.name.clone(),
                locations: self.locations.clone(),
                max_temp_age,
            },
        );
        for receiver in receivers {
            self.events.register(receiver);
        }

        self.queues.insert(
            index.name.clone(),
            IndexJobQueue::new(
                index.name.clone(),
                index.queue.to_queue_config(),
                self.events.clone(),
            ),
        );

        let sources = index
            .sources
            .iter()
            .map(|source| -> Arc<dyn ContentSource> {
                match source {
                    SourceConfig::Filesystem {
                        name,
                        root,
                        extensions,
                    } => Arc::new(
                        FsContentSource::new(name.clone(), root.clone())
                            .with_extensions(extensions),
                    ),
                }
            })
            .collect();

        self.setups.insert(
            index.name.clone(),
            IndexSetup {
                sources,
                settings: index.update_settings(),
                tasks: build_tasks(&index.after_action_tasks, &TaskContext { max_temp_age }),
                max_temp_age,
            },
        );
        Ok(())
    }

    /// Start every queue worker
    pub fn start(&self) -> Result<()> {
        for queue in self.queues.values() {
            queue.start_worker()?;
        }
        tracing::info!("Started {} job queue(s)", self.queues.len());
        Ok(())
    }

    fn setup(&self, name: &str) -> Result<&IndexSetup> {
        self.setups.get(name).ok_or_else(|| IndexError::UnknownIndex {
            name: name.to_string(),
        })
    }

    /// One update job per configured source of `name`
    pub fn create_update_jobs(&self, name: &str) -> Result<Vec<Arc<dyn IndexJob>>> {
        let location = self.locations.get(name)?;
        let setup = self.setup(name)?;
        Ok(setup
            .sources
            .iter()
            .map(|source| -> Arc<dyn IndexJob> {
                Arc::new(UpdateCheckerJob::new(
                    location.clone(),
                    source.clone(),
                    setup.settings.clone(),
                    setup.tasks.clone(),
                ))
            })
            .collect())
    }

    /// Build update jobs for every index and enqueue them.
    ///
    /// Returns the number of jobs added.
    pub fn create_all_update_jobs(&self) -> Result<usize> {
        let mut added = 0;
        for name in self.index_names() {
            for job in self.create_update_jobs(&name)? {
                if self.add_job(&name, job)? {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    pub fn create_optimize_job(&self, name: &str) -> Result<Arc<dyn IndexJob>> {
        Ok(Arc::new(OptimizeJob::new(self.locations.get(name)?)))
    }

    pub fn create_clear_job(&self, name: &str) -> Result<Arc<dyn IndexJob>> {
        Ok(Arc::new(ClearIndexJob::new(self.locations.get(name)?)))
    }

    /// Clear only the suggestion index of `name`; queue it on `name`'s queue
    pub fn create_suggestion_clear_job(&self, name: &str) -> Result<Arc<dyn IndexJob>> {
        let location = self.locations.get(name)?;
        let suggestion = location
            .suggestion()
            .ok_or_else(|| IndexError::Unsupported {
                index: name.to_string(),
                reason: "no suggestion index is configured".to_string(),
            })?;
        Ok(Arc::new(ClearIndexJob::new(suggestion.clone())))
    }

    pub fn add_job(&self, name: &str, job: Arc<dyn IndexJob>) -> Result<bool> {
        Ok(self.queue(name)?.add_job(job))
    }

    pub fn location(&self, name: &str) -> Result<Arc<IndexLocation>> {
        self.locations.get(name)
    }

    pub fn queue(&self, name: &str) -> Result<&IndexJobQueue> {
        self.queues.get(name).ok_or_else(|| IndexError::UnknownIndex {
            name: name.to_string(),
        })
    }

    pub fn index_names(&self) -> Vec<String> {
        self.locations.names()
    }

    /// Archive `name` now, on the calling thread
    pub fn archive(&self, name: &str) -> Result<ArchiveOutcome> {
        let location = self.locations.get(name)?;
        let max_temp_age = self.setup(name)?.max_temp_age;
        IndexCompressor::for_location(&location, max_temp_age)?.compress()
    }

    /// Stop every queue, wait for receivers' background work, then close
    /// the accessors.
    ///
    /// Returns how many accessors were still in use.
    pub fn stop(&self) -> usize {
        for queue in self.queues.values() {
            queue.stop();
        }
        self.events.shutdown();
        let in_use = self.accessors.close();
        tracing::info!("Indexer stopped");
        in_use
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn locations(&self) -> &Arc<LocationRegistry> {
        &self.locations
    }

    pub fn accessors(&self) -> &Arc<AccessorRegistry> {
        &self.accessors
    }
}

impl std::fmt::Debug for IndexController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexController")
            .field("indexes", &self.index_names())
            .field("receivers", &self.events.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    fn config_for(root: &std::path::Path, extra: &str) -> IndexerConfig {
        fs::create_dir_all(root.join("content")).unwrap();
        fs::write(root.join("content").join("a.md"), "alpha").unwrap();
        let toml = format!(
            r#"
[[index]]
name = "docs"
path = "{index}"
suggestion_path = "{suggest}"
{extra}

[[index.source]]
name = "files"
kind = "filesystem"
root = "{content}"
"#,
            index = root.join("docs").join("index").display(),
            suggest = root.join("docs").join("suggest").display(),
            content = root.join("content").display(),
            extra = extra,
        );
        IndexerConfig::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn test_from_config_builds_locations_and_queues() {
        let tmp = tempdir().unwrap();
        let controller =
            IndexController::from_config(&config_for(tmp.path(), r#"receivers = ["compress_index", "bogus"]"#))
                .unwrap();

        assert_eq!(controller.index_names(), vec!["docs"]);
        let location = controller.location("docs").unwrap();
        assert_eq!(location.suggestion().unwrap().name(), "docs-suggest");
        assert_eq!(controller.queue("docs").unwrap().name(), "docs");
        assert_eq!(controller.events().receiver_count(), 1);
        assert_eq!(controller.accessors().len(), 2);
        assert!(matches!(
            controller.queue("missing"),
            Err(IndexError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn test_update_job_per_source() {
        let tmp = tempdir().unwrap();
        let controller = IndexController::from_config(&config_for(tmp.path(), "")).unwrap();

        let jobs = controller.create_update_jobs("docs").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].identifier(), "docs:files");

        jobs[0].run(&CancellationToken::new());
        assert!(jobs[0].is_modified_index());
        let location = controller.location("docs").unwrap();
        assert_eq!(location.accessor().reader(false).unwrap().num_docs(), 1);
    }

    #[test]
    fn test_suggestion_clear_job() {
        let tmp = tempdir().unwrap();
        let controller = IndexController::from_config(&config_for(tmp.path(), "")).unwrap();
        let suggestion = controller.location("docs").unwrap().suggestion().unwrap().clone();
        {
            let writer = suggestion.accessor().writer().unwrap();
            writer.add_document(crate::store::Document::new().with("word", "alpha"));
        }
        controller.create_update_jobs("docs").unwrap()[0].run(&CancellationToken::new());

        let job = controller.create_suggestion_clear_job("docs").unwrap();
        assert_eq!(job.identifier(), "docs-suggest:clear");
        job.run(&CancellationToken::new());
        assert!(job.is_modified_index());

        assert_eq!(suggestion.accessor().reader(false).unwrap().num_docs(), 0);
        // The main index is untouched
        let location = controller.location("docs").unwrap();
        location.accessor().reopen().unwrap();
        assert_eq!(location.accessor().reader(false).unwrap().num_docs(), 1);

        assert!(matches!(
            controller.create_suggestion_clear_job("missing"),
            Err(IndexError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn test_suggestion_clear_needs_suggestion_index() {
        let tmp = tempdir().unwrap();
        let mut config = config_for(tmp.path(), "");
        config.indexes[0].suggestion_path = None;
        let controller = IndexController::from_config(&config).unwrap();

        assert!(matches!(
            controller.create_suggestion_clear_job("docs"),
            Err(IndexError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_accessors_use_archive_max_age_for_locks() {
        let tmp = tempdir().unwrap();
        let controller =
            IndexController::from_config(&config_for(tmp.path(), "")).unwrap();
        let location = controller.location("docs").unwrap();
        let expected = controller.setup("docs").unwrap().max_temp_age;

        assert_eq!(location.accessor().lock_max_age(), expected);
        assert_eq!(
            location.suggestion().unwrap().accessor().lock_max_age(),
            expected
        );
    }

    #[test]
    fn test_archive_and_stop() {
        let tmp = tempdir().unwrap();
        let controller = IndexController::from_config(&config_for(tmp.path(), "")).unwrap();

        match controller.archive("docs").unwrap() {
            ArchiveOutcome::Archived { path, .. } => assert!(path.exists()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(controller.archive("missing").is_err());

        controller.start().unwrap();
        assert_eq!(controller.stop(), 0);
        assert!(controller.accessors().is_closed());
        assert!(controller.queue("docs").unwrap().is_stopped());
    }
}
