//! Per-location job queue with a single worker thread
//!
//! ```text
//!   add_job ──► pending (FIFO, no duplicates)
//!                 │ poll (100 ms)
//!                 ▼
//!   IndexJobQueueWorker-<name> ──spawn+join──► index-job-<id>
//!                 │
//!                 ├─► history (newest first, bounded)
//!                 └─► queue empty? fire JOBQUEUE_FINISHED {index, modified}
//! ```
//!
//! States: idle → running ⇄ paused → stopped. Stopped is terminal; a stopped
//! queue cannot be started again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};
use crate::events::{Event, EventManager, JobQueueMetadata};
use crate::jobs::IndexJob;

/// How long `stop_worker` waits for the worker to exit
const STOP_WORKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Sleep between checks when the queue is empty
    pub check_interval: Duration,
    /// Number of finished jobs kept in the history
    pub last_jobs_size: usize,
    /// Leave jobs that processed no objects out of the history
    pub hide_empty_jobs: bool,
    /// How long one poll waits for a job
    pub poll_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            last_jobs_size: 3,
            hide_empty_jobs: false,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

struct RunningJob {
    job: Arc<dyn IndexJob>,
    cancel: CancellationToken,
}

/// State shared between the queue handle and its worker thread
struct QueueShared {
    name: String,
    config: QueueConfig,
    events: Arc<EventManager>,
    pending: Mutex<VecDeque<Arc<dyn IndexJob>>>,
    job_available: Condvar,
    paused: AtomicBool,
    stopped: AtomicBool,
    /// Guards pause/stop transitions and the idle sleep
    control: Mutex<()>,
    control_changed: Condvar,
    current: Mutex<Option<RunningJob>>,
    history: Mutex<VecDeque<Arc<dyn IndexJob>>>,
    /// Batch bookkeeping, present between the first job and the drain
    metadata: Mutex<Option<JobQueueMetadata>>,
    worker_alive: AtomicBool,
}

pub struct IndexJobQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexJobQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig, events: Arc<EventManager>) -> Self {
        let name = name.into();
        tracing::debug!("Created job queue for {}", name);
        Self {
            shared: Arc::new(QueueShared {
                name,
                config,
                events,
                pending: Mutex::new(VecDeque::new()),
                job_available: Condvar::new(),
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                control: Mutex::new(()),
                control_changed: Condvar::new(),
                current: Mutex::new(None),
                history: Mutex::new(VecDeque::new()),
                metadata: Mutex::new(None),
                worker_alive: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a job unless the very same job is already waiting.
    pub fn add_job(&self, job: Arc<dyn IndexJob>) -> bool {
        let mut pending = self.shared.pending.lock();
        if pending.iter().any(|queued| same_job(queued, &job)) {
            tracing::debug!("Job {} is already queued", job.identifier());
            return false;
        }
        pending.push_back(job);
        self.shared.job_available.notify_one();
        true
    }

    /// Enqueue several jobs. Returns true only if every job was added.
    pub fn add_jobs(&self, jobs: impl IntoIterator<Item = Arc<dyn IndexJob>>) -> bool {
        let mut all_added = true;
        let mut any = false;
        for job in jobs {
            any = true;
            all_added &= self.add_job(job);
        }
        any && all_added
    }

    pub fn start_worker(&self) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(IndexError::QueueStopped {
                index: self.shared.name.clone(),
            });
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.worker_alive.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("IndexJobQueueWorker-{}", self.shared.name))
            .spawn(move || shared.work())
            .map_err(|e| {
                self.shared.worker_alive.store(false, Ordering::SeqCst);
                IndexError::Io(e)
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Hold the worker before its next job. A running job is not interrupted.
    pub fn pause_worker(&self) {
        let _guard = self.shared.control.lock();
        self.shared.paused.store(true, Ordering::SeqCst);
        tracing::info!("Paused job queue {}", self.shared.name);
    }

    pub fn resume_worker(&self) {
        let _guard = self.shared.control.lock();
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.control_changed.notify_all();
        tracing::info!("Resumed job queue {}", self.shared.name);
    }

    /// Cancel the running job, wait for the worker to finish and discard
    /// every pending job. The queue cannot be restarted.
    pub fn stop(&self) {
        self.shared.signal_stop();
        if let Some(running) = self.shared.current.lock().as_ref() {
            tracing::info!("Cancelling job {}", running.job.identifier());
            running.cancel.cancel();
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Worker of job queue {} panicked", self.shared.name);
            }
        }

        let discarded = {
            let mut pending = self.shared.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        tracing::info!(
            "Stopped job queue {} ({} pending job(s) discarded)",
            self.shared.name,
            discarded
        );
    }

    /// Ask the worker to exit after the running job and wait a bounded time.
    ///
    /// Returns whether the worker exited in time.
    pub fn stop_worker(&self) -> bool {
        self.shared.signal_stop();

        let deadline = Instant::now() + STOP_WORKER_TIMEOUT;
        {
            let mut guard = self.shared.control.lock();
            while self.shared.worker_alive.load(Ordering::SeqCst) {
                if self
                    .shared
                    .control_changed
                    .wait_until(&mut guard, deadline)
                    .timed_out()
                {
                    break;
                }
            }
        }

        if self.shared.worker_alive.load(Ordering::SeqCst) {
            tracing::warn!(
                "Worker of job queue {} did not stop within {:?}",
                self.shared.name,
                STOP_WORKER_TIMEOUT
            );
            return false;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        true
    }

    /// Worker alive, not paused and not stopped
    pub fn is_running(&self) -> bool {
        !self.shared.paused.load(Ordering::SeqCst)
            && !self.shared.stopped.load(Ordering::SeqCst)
            && self.shared.worker_alive.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn current_job(&self) -> Option<Arc<dyn IndexJob>> {
        self.shared
            .current
            .lock()
            .as_ref()
            .map(|running| running.job.clone())
    }

    /// Finished jobs, newest first
    pub fn last_jobs(&self) -> Vec<Arc<dyn IndexJob>> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// Number of pending jobs
    pub fn size(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn interval(&self) -> Duration {
        self.shared.config.check_interval
    }
}

impl Drop for IndexJobQueue {
    fn drop(&mut self) {
        // The worker only holds the shared state; make sure it exits
        self.shared.signal_stop();
        if let Some(running) = self.shared.current.lock().as_ref() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for IndexJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexJobQueue")
            .field("name", &self.shared.name)
            .field("pending", &self.size())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Identity comparison on the job object, ignoring vtable pointers
fn same_job(a: &Arc<dyn IndexJob>, b: &Arc<dyn IndexJob>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl QueueShared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn signal_stop(&self) {
        {
            let _guard = self.control.lock();
            self.stopped.store(true, Ordering::SeqCst);
            self.control_changed.notify_all();
        }
        let _pending = self.pending.lock();
        self.job_available.notify_all();
    }

    fn work(&self) {
        tracing::info!("Job queue worker for {} started", self.name);
        while !self.is_stopped() {
            self.wait_while_paused();
            if self.is_stopped() {
                break;
            }
            match self.poll() {
                Some(job) => self.run_job(job),
                None => self.idle(),
            }
        }

        let _guard = self.control.lock();
        self.worker_alive.store(false, Ordering::SeqCst);
        self.control_changed.notify_all();
        tracing::info!("Job queue worker for {} stopped", self.name);
    }

    fn wait_while_paused(&self) {
        let mut guard = self.control.lock();
        while self.paused.load(Ordering::SeqCst) && !self.is_stopped() {
            self.control_changed.wait(&mut guard);
        }
    }

    /// Take the next job, waiting up to the poll timeout
    fn poll(&self) -> Option<Arc<dyn IndexJob>> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            self.job_available
                .wait_for(&mut pending, self.config.poll_timeout);
        }
        if self.paused.load(Ordering::SeqCst) || self.is_stopped() {
            return None;
        }
        pending.pop_front()
    }

    fn idle(&self) {
        let mut guard = self.control.lock();
        if !self.is_stopped() {
            self.control_changed
                .wait_for(&mut guard, self.config.check_interval);
        }
    }

    fn run_job(&self, job: Arc<dyn IndexJob>) {
        let identifier = job.identifier().to_string();
        self.metadata
            .lock()
            .get_or_insert_with(|| JobQueueMetadata::new(&self.name, false));

        let cancel = CancellationToken::new();
        *self.current.lock() = Some(RunningJob {
            job: job.clone(),
            cancel: cancel.clone(),
        });
        // stop() may have looked for a current job just before we set it
        if self.is_stopped() {
            cancel.cancel();
        }

        tracing::info!("Starting job {}", identifier);
        let spawned = {
            let job = job.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(format!("index-job-{}", identifier))
                .spawn(move || job.run(&cancel))
        };
        match spawned {
            Ok(handle) => {
                if handle.join().is_err() {
                    tracing::error!("Job {} panicked", identifier);
                }
            }
            Err(e) => tracing::error!("Cannot start thread for job {}: {}", identifier, e),
        }

        *self.current.lock() = None;
        self.remember(job.clone());

        let mut metadata = self.metadata.lock();
        if let Some(meta) = metadata.as_mut() {
            meta.merge_modified(job.is_modified_index());
        }
        let drained = self.pending.lock().is_empty();
        let finished = if drained { metadata.take() } else { None };
        drop(metadata);

        tracing::info!(
            "Finished job {} ({} objects, modified: {})",
            identifier,
            job.objects_done(),
            job.is_modified_index()
        );

        if let Some(meta) = finished {
            tracing::debug!("Job queue {} drained, firing finished event", self.name);
            self.events.fire_event(&Event::JobQueueFinished(meta));
        }
    }

    fn remember(&self, job: Arc<dyn IndexJob>) {
        if self.config.hide_empty_jobs && job.objects_done() == 0 {
            return;
        }
        let mut history = self.history.lock();
        history.push_front(job);
        history.truncate(self.config.last_jobs_size);
    }
}
