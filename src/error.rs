//! Error types and exit codes for indexkeeper

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Main error type for indexkeeper operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Another operation (indexing or archiving) holds the index.
    /// Callers may retry later; nothing in the crate retries automatically.
    #[error("Index is locked: {path}")]
    Locked { path: PathBuf },

    #[error("Directory is not writable: {path}")]
    NotWritable { path: PathBuf },

    #[error("Accessor for {directory} is closed")]
    AccessorClosed { directory: String },

    #[error(
        "Accessor for {directory} still has handles checked out \
         (readers: {reading}, writing readers: {writing}, writers: {writers}, searchers: {searchers})"
    )]
    AccessorInUse {
        directory: String,
        reading: usize,
        writing: usize,
        writers: usize,
        searchers: usize,
    },

    #[error("No accessor registered for {directory}")]
    UnknownDirectory { directory: String },

    #[error("Unknown index: {name}")]
    UnknownIndex { name: String },

    #[error("Job queue for {index} has been stopped")]
    QueueStopped { index: String },

    #[error("Operation not supported for {index}: {reason}")]
    Unsupported { index: String, reason: String },

    #[error("Document {doc} not found")]
    DocumentNotFound { doc: usize },

    #[error("Reader for {directory} was opened read-only")]
    ReadOnlyReader { directory: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Cooperative cancellation stopped the operation before it completed
    #[error("{operation} was interrupted")]
    Interrupted { operation: String },

    #[error("Archive error for {index}: {message}")]
    Archive { index: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IndexError {
    /// Convert error to an exit code for the CLI:
    /// - 1: IO / archive failure
    /// - 2: Configuration error
    /// - 3: Index or archive locked
    /// - 4: Unknown index / directory, unsupported operation
    /// - 5: Lifecycle misuse (closed accessor, handles still out, stopped queue)
    /// - 6: Interrupted
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Archive { .. } => ExitCode::from(1),
            Self::NotWritable { .. } => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            Self::Locked { .. } => ExitCode::from(3),
            Self::UnknownIndex { .. }
            | Self::UnknownDirectory { .. }
            | Self::Unsupported { .. }
            | Self::DocumentNotFound { .. } => ExitCode::from(4),
            Self::AccessorClosed { .. }
            | Self::AccessorInUse { .. }
            | Self::QueueStopped { .. }
            | Self::ReadOnlyReader { .. } => ExitCode::from(5),
            Self::Interrupted { .. } => ExitCode::from(6),
        }
    }

    /// Whether this error signals contention that may clear up later
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Result type alias for indexkeeper operations
pub type Result<T> = std::result::Result<T, IndexError>;
