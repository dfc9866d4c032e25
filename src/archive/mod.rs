//! Consistent `.tar.gz` snapshots of index directories
//!
//! ```text
//! writable? ─► writer slots ─► write.lock ─► stale <index>.tmp? ─► tar+gzip ─► copy ─► rm tmp
//!     │             │              │               │
//! NotWritable     Locked         Locked        InProgress
//! ```
//!
//! For the whole run the compressor holds the writer slot of every archived
//! accessor and a `write.lock` in every archived directory, so no commit
//! lands mid-snapshot. A `write.lock` older than the maximum temp age is
//! left over from a crashed run and gets replaced.
//!
//! The archive and its temp file live next to the primary index directory.
//! Readers of `<index>.tar.gz` only ever see a complete archive because it
//! is replaced from the finished temp file.

pub mod compressor;
pub mod handler;
pub mod lock;

pub use compressor::{ArchiveGuard, ArchiveOutcome, IndexCompressor};
pub use handler::{CompressIndexHandler, CompressIndexTask};
pub use lock::LockFile;

/// Lock token inside each archived index directory
pub const WRITE_LOCK_FILE: &str = "write.lock";

/// Default age after which a leftover temp or lock file counts as abandoned
pub const DEFAULT_MAX_TEMP_AGE_MINUTES: u64 = 30;
