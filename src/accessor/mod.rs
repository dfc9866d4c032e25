//! Reference-counted access to one index directory
//!
//! An [`IndexAccessor`] hands out shared readers, a cached searcher, a single
//! writer, and writing readers (readers that may delete). It tracks how many
//! of each are checked out so that commits happen exactly once, when the last
//! holder releases.
//!
//! ```text
//!   get_reader(false) ──► reading reader (shared, cached until reopen)
//!   get_searcher()    ──► searcher over the reading reader (cached)
//!   get_reader(true)  ──► writing reader ─┐ mutually exclusive,
//!   get_writer()      ──► writer ─────────┘ last release commits
//! ```
//!
//! # Locking
//!
//! All bookkeeping lives in one `parking_lot::Mutex`. Directory I/O (opening
//! readers, commits, generation checks) always happens with the mutex
//! released. While a writing reader or writer is being opened or committed
//! its use count stays reserved, so other callers wait on the condvar
//! instead of opening a second one.
//!
//! # Archive lock
//!
//! While an archiver holds `write.lock` in the index directory, checking
//! out the writer or a writing reader fails with [`IndexError::Locked`].
//! A lock older than the configured maximum age is treated as abandoned.
//!
//! Handles are plain `Arc`s: a reader obtained before [`IndexAccessor::reopen`]
//! stays usable until dropped, it just stops being counted.

pub mod registry;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::archive::{LockFile, DEFAULT_MAX_TEMP_AGE_MINUTES, WRITE_LOCK_FILE};
use crate::error::{IndexError, Result};
use crate::store::{Analyzer, Directory, DirectoryKey, IndexReader, IndexSearcher, IndexWriter};

pub use registry::AccessorRegistry;

#[derive(Default)]
struct AccessorState {
    /// Shared read-only reader, kept open between checkouts
    reading_reader: Option<Arc<IndexReader>>,
    reading_out: usize,
    /// Present only while checked out
    writing_reader: Option<Arc<IndexReader>>,
    writing_out: usize,
    /// Present only while checked out
    writer: Option<Arc<IndexWriter>>,
    writer_out: usize,
    /// Cached searcher bound to `reading_reader`
    searcher: Option<Arc<IndexSearcher>>,
    searchers_out: usize,
    /// A commit happened since the reading reader was opened
    needs_reopen: bool,
    closed: bool,
}

pub struct IndexAccessor {
    directory: Arc<dyn Directory>,
    analyzer: Analyzer,
    state: Mutex<AccessorState>,
    /// Signalled whenever a writing reader or writer slot frees up
    released: Condvar,
    /// Seconds after which a `write.lock` no longer blocks writers
    lock_max_age: AtomicU64,
}

impl IndexAccessor {
    pub fn new(directory: Arc<dyn Directory>, analyzer: Analyzer) -> Self {
        Self {
            directory,
            analyzer,
            state: Mutex::new(AccessorState::default()),
            released: Condvar::new(),
            lock_max_age: AtomicU64::new(DEFAULT_MAX_TEMP_AGE_MINUTES * 60),
        }
    }

    pub fn set_lock_max_age(&self, max_age: Duration) {
        self.lock_max_age.store(max_age.as_secs(), Ordering::Relaxed);
    }

    pub fn lock_max_age(&self) -> Duration {
        Duration::from_secs(self.lock_max_age.load(Ordering::Relaxed))
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn key(&self) -> &DirectoryKey {
        self.directory.key()
    }

    pub fn analyzer(&self) -> Analyzer {
        self.analyzer
    }

    fn closed_error(&self) -> IndexError {
        IndexError::AccessorClosed {
            directory: self.key().to_string(),
        }
    }

    /// Fails while an archiver holds the directory's `write.lock`.
    ///
    /// Called with a slot reserved; `unreserve` hands it back on failure.
    fn check_archive_lock(&self, unreserve: impl FnOnce(&mut AccessorState)) -> Result<()> {
        let Some(dir) = self.directory.path() else {
            return Ok(());
        };
        if !LockFile::is_held(dir, self.lock_max_age()) {
            return Ok(());
        }

        let mut state = self.state.lock();
        unreserve(&mut *state);
        self.released.notify_all();
        drop(state);

        let path = dir.join(WRITE_LOCK_FILE);
        tracing::info!("{} is locked for archiving", path.display());
        Err(IndexError::Locked { path })
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    /// Check out the current reader, opening one if none is cached.
    ///
    /// Never reopens: a cached reader is returned even if the directory has
    /// moved on. Every successful call must be paired with
    /// [`IndexAccessor::release_reader`] (or use [`IndexAccessor::reader`]).
    pub fn get_reader(&self, for_writing: bool) -> Result<Arc<IndexReader>> {
        if for_writing {
            self.get_writing_reader()
        } else {
            self.get_reading_reader()
        }
    }

    fn get_reading_reader(&self) -> Result<Arc<IndexReader>> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            if let Some(reader) = &state.reading_reader {
                let reader = reader.clone();
                state.reading_out += 1;
                return Ok(reader);
            }
        }

        let opened = Arc::new(IndexReader::open(self.directory.clone(), false)?);

        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        // Another thread may have installed one while we were opening
        let reader = state
            .reading_reader
            .get_or_insert_with(|| opened)
            .clone();
        state.reading_out += 1;
        Ok(reader)
    }

    fn get_writing_reader(&self) -> Result<Arc<IndexReader>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(self.closed_error());
            }
            if let Some(reader) = &state.writing_reader {
                let reader = reader.clone();
                state.writing_out += 1;
                return Ok(reader);
            }
            if state.writing_out == 0 && state.writer_out == 0 {
                break;
            }
            self.released.wait(&mut state);
        }
        // Reserve the slot for the duration of the open
        state.writing_out = 1;
        drop(state);
        self.check_archive_lock(|state| state.writing_out = 0)?;

        match IndexReader::open(self.directory.clone(), true) {
            Ok(reader) => {
                let reader = Arc::new(reader);
                let mut state = self.state.lock();
                state.writing_reader = Some(reader.clone());
                self.released.notify_all();
                Ok(reader)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.writing_out = 0;
                self.released.notify_all();
                Err(e)
            }
        }
    }

    /// Return a reader obtained from [`IndexAccessor::get_reader`].
    ///
    /// Releasing a superseded or already fully released handle is a no-op.
    /// Releasing the last writing reader commits its deletions.
    pub fn release_reader(&self, reader: &Arc<IndexReader>, for_writing: bool) -> Result<()> {
        let mut state = self.state.lock();

        if !for_writing {
            let live = state
                .reading_reader
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, reader));
            if live && state.reading_out > 0 {
                state.reading_out -= 1;
            } else {
                tracing::debug!("Ignoring release of stale reader #{}", reader.id());
            }
            return Ok(());
        }

        let live = state
            .writing_reader
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, reader));
        if !live || state.writing_out == 0 {
            tracing::debug!("Ignoring release of stale writing reader #{}", reader.id());
            return Ok(());
        }

        state.writing_out -= 1;
        if state.writing_out > 0 {
            return Ok(());
        }

        // Last holder: take it out but keep the slot reserved while committing
        let Some(reader) = state.writing_reader.take() else {
            return Ok(());
        };
        state.writing_out = 1;
        drop(state);

        let committed = reader.commit();

        let mut state = self.state.lock();
        state.writing_out = 0;
        if matches!(committed, Ok(true)) {
            state.needs_reopen = true;
        }
        self.released.notify_all();
        drop(state);

        committed.map(|_| ()).map_err(|e| {
            tracing::error!("Failed to commit deletions to {}: {}", self.key(), e);
            e
        })
    }

    // ------------------------------------------------------------------
    // Writer
    // ------------------------------------------------------------------

    /// Check out the single writer, blocking while it (or a writing reader)
    /// is in use.
    pub fn get_writer(&self) -> Result<Arc<IndexWriter>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(self.closed_error());
            }
            if state.writer_out == 0 && state.writing_out == 0 {
                break;
            }
            self.released.wait(&mut state);
        }
        state.writer_out = 1;
        drop(state);
        self.check_archive_lock(|state| state.writer_out = 0)?;
        self.open_writer()
    }

    /// Like [`IndexAccessor::get_writer`] but returns `None` instead of
    /// waiting.
    pub fn try_get_writer(&self) -> Result<Option<Arc<IndexWriter>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        if state.writer_out > 0 || state.writing_out > 0 {
            return Ok(None);
        }
        state.writer_out = 1;
        drop(state);
        self.check_archive_lock(|state| state.writer_out = 0)?;
        self.open_writer().map(Some)
    }

    /// Caller holds the writer reservation
    fn open_writer(&self) -> Result<Arc<IndexWriter>> {
        match IndexWriter::open(self.directory.clone()) {
            Ok(writer) => {
                let writer = Arc::new(writer);
                self.state.lock().writer = Some(writer.clone());
                Ok(writer)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.writer_out = 0;
                self.released.notify_all();
                Err(e)
            }
        }
    }

    /// Return the writer; commits buffered changes.
    pub fn release_writer(&self, writer: &Arc<IndexWriter>) -> Result<()> {
        let mut state = self.state.lock();
        let live = state
            .writer
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, writer));
        if !live {
            tracing::debug!("Ignoring release of stale writer for {}", self.key());
            return Ok(());
        }
        let Some(writer) = state.writer.take() else {
            return Ok(());
        };
        drop(state);

        let committed = writer.commit();

        let mut state = self.state.lock();
        state.writer_out = 0;
        if matches!(committed, Ok(true)) {
            state.needs_reopen = true;
        }
        self.released.notify_all();
        drop(state);

        committed.map(|_| ()).map_err(|e| {
            tracing::error!("Failed to commit writer for {}: {}", self.key(), e);
            e
        })
    }

    // ------------------------------------------------------------------
    // Searchers
    // ------------------------------------------------------------------

    /// Check out the cached searcher over the current reading reader.
    pub fn get_searcher(&self) -> Result<Arc<IndexSearcher>> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            if let Some(searcher) = &state.searcher {
                let searcher = searcher.clone();
                state.searchers_out += 1;
                return Ok(searcher);
            }
            if let Some(reader) = state.reading_reader.clone() {
                return Ok(self.install_searcher(&mut state, reader));
            }
        }

        let opened = Arc::new(IndexReader::open(self.directory.clone(), false)?);

        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        if let Some(searcher) = &state.searcher {
            let searcher = searcher.clone();
            state.searchers_out += 1;
            return Ok(searcher);
        }
        let reader = state.reading_reader.get_or_insert_with(|| opened).clone();
        Ok(self.install_searcher(&mut state, reader))
    }

    /// Check out a searcher bound to `reader`.
    ///
    /// If `reader` is the current reading reader this is the cached searcher;
    /// otherwise a fresh, uncounted searcher is returned.
    pub fn get_searcher_for(&self, reader: &Arc<IndexReader>) -> Result<Arc<IndexSearcher>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        let current = state
            .reading_reader
            .as_ref()
            .is_some_and(|r| Arc::ptr_eq(r, reader));
        if !current {
            return Ok(Arc::new(IndexSearcher::new(reader.clone(), self.analyzer)));
        }
        if let Some(searcher) = &state.searcher {
            let searcher = searcher.clone();
            state.searchers_out += 1;
            return Ok(searcher);
        }
        Ok(self.install_searcher(&mut state, reader.clone()))
    }

    fn install_searcher(
        &self,
        state: &mut AccessorState,
        reader: Arc<IndexReader>,
    ) -> Arc<IndexSearcher> {
        let searcher = Arc::new(IndexSearcher::new(reader, self.analyzer));
        state.searcher = Some(searcher.clone());
        state.searchers_out += 1;
        searcher
    }

    /// Return a searcher. Searchers from before a reopen are not counted.
    pub fn release_searcher(&self, searcher: &Arc<IndexSearcher>) {
        let mut state = self.state.lock();
        let live = state
            .searcher
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, searcher));
        if live && state.searchers_out > 0 {
            state.searchers_out -= 1;
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Adopt directory changes.
    ///
    /// If the cached reader no longer matches the directory (or a local
    /// commit flagged it) the reader and searcher are dropped from the cache
    /// and their counts reset; the next checkout opens fresh handles.
    /// Returns whether anything was invalidated.
    pub fn reopen(&self) -> Result<bool> {
        let (current, needs_reopen) = {
            let state = self.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            (state.reading_reader.clone(), state.needs_reopen)
        };

        let stale = match &current {
            Some(reader) => !reader.is_current()?,
            None => false,
        };
        if !stale && !needs_reopen {
            return Ok(false);
        }

        let mut state = self.state.lock();
        let unchanged = match (&state.reading_reader, &current) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            state.reading_reader = None;
            state.reading_out = 0;
            state.searcher = None;
            state.searchers_out = 0;
        }
        state.needs_reopen = false;
        tracing::debug!("Reopened accessor for {}", self.key());
        Ok(true)
    }

    /// Drop every handle and refuse further checkouts.
    ///
    /// Fails with [`IndexError::AccessorInUse`] while anything is checked out.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if state.reading_out > 0
            || state.writing_out > 0
            || state.writer_out > 0
            || state.searchers_out > 0
        {
            let err = IndexError::AccessorInUse {
                directory: self.key().to_string(),
                reading: state.reading_out,
                writing: state.writing_out,
                writers: state.writer_out,
                searchers: state.searchers_out,
            };
            tracing::error!("{}", err);
            return Err(err);
        }
        state.closed = true;
        state.reading_reader = None;
        state.searcher = None;
        self.released.notify_all();
        tracing::debug!("Closed accessor for {}", self.key());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn reading_readers_out(&self) -> usize {
        self.state.lock().reading_out
    }

    pub fn writing_readers_out(&self) -> usize {
        self.state.lock().writing_out
    }

    pub fn writer_use_count(&self) -> usize {
        self.state.lock().writer_out
    }

    pub fn searcher_use_count(&self) -> usize {
        self.state.lock().searchers_out
    }

    pub fn needs_reopen(&self) -> bool {
        self.state.lock().needs_reopen
    }

    /// Whether indexing currently holds the writer or a writing reader
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer_out > 0 || state.writing_out > 0
    }

    // ------------------------------------------------------------------
    // RAII leases
    // ------------------------------------------------------------------

    pub fn reader(self: &Arc<Self>, for_writing: bool) -> Result<ReaderLease> {
        let reader = self.get_reader(for_writing)?;
        Ok(ReaderLease {
            accessor: self.clone(),
            reader,
            for_writing,
        })
    }

    pub fn writer(self: &Arc<Self>) -> Result<WriterLease> {
        let writer = self.get_writer()?;
        Ok(WriterLease {
            accessor: self.clone(),
            writer,
        })
    }

    /// Writer lease, or `None` if the writer or a writing reader is out
    pub fn try_writer(self: &Arc<Self>) -> Result<Option<WriterLease>> {
        Ok(self.try_get_writer()?.map(|writer| WriterLease {
            accessor: self.clone(),
            writer,
        }))
    }

    pub fn searcher(self: &Arc<Self>) -> Result<SearcherLease> {
        let searcher = self.get_searcher()?;
        Ok(SearcherLease {
            accessor: self.clone(),
            searcher,
        })
    }
}

impl fmt::Debug for IndexAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("IndexAccessor")
            .field("directory", self.key())
            .field("reading_out", &state.reading_out)
            .field("writing_out", &state.writing_out)
            .field("writer_out", &state.writer_out)
            .field("searchers_out", &state.searchers_out)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Reader checkout that is released on drop
pub struct ReaderLease {
    accessor: Arc<IndexAccessor>,
    reader: Arc<IndexReader>,
    for_writing: bool,
}

impl ReaderLease {
    pub fn handle(&self) -> &Arc<IndexReader> {
        &self.reader
    }
}

impl Deref for ReaderLease {
    type Target = IndexReader;

    fn deref(&self) -> &IndexReader {
        &self.reader
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        if let Err(e) = self.accessor.release_reader(&self.reader, self.for_writing) {
            tracing::error!("Releasing reader for {} failed: {}", self.accessor.key(), e);
        }
    }
}

/// Writer checkout that commits on drop
pub struct WriterLease {
    accessor: Arc<IndexAccessor>,
    writer: Arc<IndexWriter>,
}

impl Deref for WriterLease {
    type Target = IndexWriter;

    fn deref(&self) -> &IndexWriter {
        &self.writer
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        if let Err(e) = self.accessor.release_writer(&self.writer) {
            tracing::error!("Releasing writer for {} failed: {}", self.accessor.key(), e);
        }
    }
}

/// Searcher checkout that is released on drop
pub struct SearcherLease {
    accessor: Arc<IndexAccessor>,
    searcher: Arc<IndexSearcher>,
}

impl SearcherLease {
    pub fn handle(&self) -> &Arc<IndexSearcher> {
        &self.searcher
    }
}

impl Deref for SearcherLease {
    type Target = IndexSearcher;

    fn deref(&self) -> &IndexSearcher {
        &self.searcher
    }
}

impl Drop for SearcherLease {
    fn drop(&mut self) {
        self.accessor.release_searcher(&self.searcher);
    }
}
