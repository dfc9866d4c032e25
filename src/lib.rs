//! indexkeeper: keeps full-text indexes in sync with their content sources
//!
//! The crate manages the lifecycle of on-disk indexes rather than the search
//! engine itself:
//!
//! - [`accessor`]: shared, reference-counted readers, writer and searchers
//!   per index directory, with explicit reopen
//! - [`checker`]: decides which source objects are out of date and removes
//!   documents whose source object is gone
//! - [`queue`]: one background worker per index, running [`jobs`] in order
//!   and firing a finished event when the queue drains
//! - [`archive`]: lock-guarded `tar.gz` snapshots of an index directory
//! - [`controller`]: builds all of the above from an [`IndexerConfig`]
//!
//! # Example
//!
//! ```ignore
//! use indexkeeper::{IndexController, IndexerConfig};
//!
//! let config = IndexerConfig::load_from("indexkeeper.toml".as_ref())?;
//! let controller = IndexController::from_config(&config)?;
//! controller.start()?;
//! controller.create_all_update_jobs()?;
//! // ...
//! controller.stop();
//! ```

pub mod accessor;
pub mod archive;
pub mod checker;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fs_utils;
pub mod jobs;
pub mod location;
pub mod plugins;
pub mod queue;
pub mod source;
pub mod store;

pub use accessor::{AccessorRegistry, IndexAccessor};
pub use archive::{ArchiveOutcome, CompressIndexHandler, IndexCompressor, LockFile};
pub use checker::UpdateChecker;
pub use config::IndexerConfig;
pub use controller::IndexController;
pub use error::{IndexError, Result};
pub use events::{Event, EventManager, EventReceiver, JobQueueMetadata, JOBQUEUE_FINISHED};
pub use jobs::{IndexJob, UpdateCheckerJob};
pub use location::{IndexLocation, LocationRegistry};
pub use queue::{IndexJobQueue, QueueConfig};
pub use source::{ContentSource, FsContentSource, SourceObject};
