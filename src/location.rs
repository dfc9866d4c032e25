//! Named index locations
//!
//! A location ties an index name to its directory, the shared accessor and
//! the `reopen` marker file. A primary location may carry an auxiliary
//! suggestion location that is archived together with it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::accessor::IndexAccessor;
use crate::error::{IndexError, Result};
use crate::store::Directory;

/// File that asks readers to pick up committed changes
pub const REOPEN_FILE: &str = "reopen";

/// The `reopen` marker inside an index directory.
///
/// Memory directories have no marker; every operation is a no-op there.
#[derive(Debug, Clone)]
pub struct ReopenMarker {
    path: Option<PathBuf>,
}

impl ReopenMarker {
    pub fn for_directory(directory: &dyn Directory) -> Self {
        Self {
            path: directory.path().map(|dir| dir.join(REOPEN_FILE)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn create(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, b"")?;
            tracing::debug!("Created reopen marker {}", path.display());
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.as_deref().is_some_and(Path::exists)
    }

    /// Remove the marker. Returns whether one was present.
    pub fn remove(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Where an index directory is archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePaths {
    /// `<parent>/<index>.tar.gz`
    pub archive: PathBuf,
    /// `<parent>/<index>.tmp`
    pub temp: PathBuf,
}

#[derive(Debug)]
pub struct IndexLocation {
    /// Index name from the configuration
    name: String,
    directory: Arc<dyn Directory>,
    accessor: Arc<IndexAccessor>,
    reopen_marker: ReopenMarker,
    /// Auxiliary (did-you-mean) index archived alongside this one
    suggestion: Option<Arc<IndexLocation>>,
}

impl IndexLocation {
    pub fn new(name: impl Into<String>, accessor: Arc<IndexAccessor>) -> Self {
        let directory = accessor.directory().clone();
        let reopen_marker = ReopenMarker::for_directory(directory.as_ref());
        Self {
            name: name.into(),
            directory,
            accessor,
            reopen_marker,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: Arc<IndexLocation>) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accessor(&self) -> &Arc<IndexAccessor> {
        &self.accessor
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn directory_path(&self) -> Option<&Path> {
        self.directory.path()
    }

    pub fn suggestion(&self) -> Option<&Arc<IndexLocation>> {
        self.suggestion.as_ref()
    }

    pub fn reopen_marker(&self) -> &ReopenMarker {
        &self.reopen_marker
    }

    /// Whether indexing currently holds the writer or a writing reader
    pub fn is_locked(&self) -> bool {
        self.accessor.is_locked()
    }

    pub fn check_lock(&self) -> Result<()> {
        if self.is_locked() {
            return Err(IndexError::Locked {
                path: self
                    .directory_path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(self.directory.key().to_string())),
            });
        }
        Ok(())
    }

    pub fn create_reopen_file(&self) -> Result<()> {
        self.reopen_marker.create()
    }

    /// Reopen the accessor if the reopen marker is present.
    ///
    /// The marker is removed before reopening so a marker written during the
    /// reopen is picked up next time.
    pub fn reopen_check(&self) -> Result<bool> {
        if !self.reopen_marker.exists() {
            return Ok(false);
        }
        self.reopen_marker.remove()?;
        self.accessor.reopen()?;
        tracing::debug!("Reopened index {} after reopen marker", self.name);
        Ok(true)
    }

    /// Archive and temp file next to the index directory
    pub fn archive_paths(&self) -> Option<ArchivePaths> {
        let dir = self.directory_path()?;
        let parent = dir.parent().unwrap_or(dir);
        Some(ArchivePaths {
            archive: parent.join(format!("{}.tar.gz", self.name)),
            temp: parent.join(format!("{}.tmp", self.name)),
        })
    }
}

/// Index name -> location
#[derive(Debug, Default)]
pub struct LocationRegistry {
    locations: RwLock<BTreeMap<String, Arc<IndexLocation>>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a location, replacing any previous one with the same name
    pub fn register(&self, location: Arc<IndexLocation>) -> Option<Arc<IndexLocation>> {
        self.locations
            .write()
            .insert(location.name().to_string(), location)
    }

    pub fn get(&self, name: &str) -> Result<Arc<IndexLocation>> {
        self.locations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownIndex {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.locations.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<IndexLocation>> {
        self.locations.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.locations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.read().is_empty()
    }
}
