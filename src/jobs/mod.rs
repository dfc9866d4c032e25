//! Index-mutating jobs run by the job queue
//!
//! - `UpdateCheckerJob` - sync one content source into an index
//! - `OptimizeJob` - rewrite the index segment
//! - `ClearIndexJob` - remove every document

pub mod clear;
pub mod optimize;
pub mod update;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use clear::ClearIndexJob;
pub use optimize::OptimizeJob;
pub use update::{UpdateCheckerJob, UpdateSettings};

/// A unit of work for one index location.
///
/// Jobs are shared as `Arc<dyn IndexJob>`; the queue runs at most one job of
/// a location at a time and keeps finished jobs only in its history.
/// `run` must poll `cancel` between units of work and return early once it
/// is cancelled.
pub trait IndexJob: Send + Sync {
    fn identifier(&self) -> &str;

    fn run(&self, cancel: &CancellationToken);

    /// Shared progress bookkeeping
    fn status(&self) -> &JobStatus;

    fn is_modified_index(&self) -> bool {
        self.status().is_modified()
    }

    fn objects_done(&self) -> usize {
        self.status().objects_done()
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.status().started_at()
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.status().finished_at()
    }
}

/// Progress of one job, updated from the job thread and read by anyone
#[derive(Debug, Default)]
pub struct JobStatus {
    modified: AtomicBool,
    objects_done: AtomicUsize,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl JobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        *self.started_at.lock() = Some(Utc::now());
    }

    pub fn finish(&self) {
        *self.finished_at.lock() = Some(Utc::now());
    }

    pub fn mark_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }

    pub fn add_done(&self, count: usize) {
        self.objects_done.fetch_add(count, Ordering::SeqCst);
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn objects_done(&self) -> usize {
        self.objects_done.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }
}

/// Serializable view of a job, for logs and status output
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub identifier: String,
    pub modified: bool,
    pub objects_done: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time in milliseconds, if the job has finished
    pub duration_ms: Option<i64>,
}

impl JobSummary {
    pub fn of(job: &dyn IndexJob) -> Self {
        let started_at = job.started_at();
        let finished_at = job.finished_at();
        Self {
            identifier: job.identifier().to_string(),
            modified: job.is_modified_index(),
            objects_done: job.objects_done(),
            started_at,
            finished_at,
            duration_ms: started_at
                .zip(finished_at)
                .map(|(start, end)| (end - start).num_milliseconds()),
        }
    }
}
