//! Upstream content sources
//!
//! A source produces the current set of objects that an index should
//! contain. Each object carries an identifier and an optional update
//! timestamp; the update job compares both against the index.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};
use crate::store::Document;

/// One upstream object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceObject {
    pub identifier: String,
    /// Last-modified marker, compared as a string
    pub timestamp: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl SourceObject {
    pub fn new(identifier: impl Into<String>, timestamp: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            timestamp,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Build the index document for this object.
    ///
    /// `id_attribute`, `timestamp_attribute` and `term_key` override any
    /// attribute of the same name.
    pub fn to_document(
        &self,
        id_attribute: &str,
        timestamp_attribute: &str,
        term_key: &str,
        term_value: &str,
    ) -> Document {
        let mut doc = Document::new();
        for (name, value) in &self.attributes {
            doc.set(name.as_str(), value.as_str());
        }
        doc.set(id_attribute, self.identifier.as_str());
        if let Some(ts) = &self.timestamp {
            doc.set(timestamp_attribute, ts.as_str());
        }
        doc.set(term_key, term_value);
        doc
    }
}

pub trait ContentSource: Send + Sync {
    /// Stable name, also used as the term value tagging this source's documents
    fn name(&self) -> &str;

    /// Current objects. Implementations should stop early once `cancel` fires.
    fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<SourceObject>>;
}

/// Files below a directory, one object per file.
///
/// - identifier: path relative to the root, `/`-separated
/// - timestamp: modification time in seconds since the epoch
/// - attributes: `path`, plus `content` for UTF-8 files
#[derive(Debug, Clone)]
pub struct FsContentSource {
    name: String,
    root: PathBuf,
    /// Lowercase extensions without dot; empty means every file
    extensions: Vec<String>,
}

impl FsContentSource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            extensions: Vec::new(),
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn wants(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn object_for(&self, path: &Path) -> Option<SourceObject> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let identifier = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let timestamp = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs().to_string());

        let mut object = SourceObject::new(identifier, timestamp)
            .with_attribute("path", path.to_string_lossy());
        match fs::read_to_string(path) {
            Ok(content) => {
                object.attributes.insert("content".to_string(), content);
            }
            Err(e) => tracing::debug!("Not indexing content of {}: {}", path.display(), e),
        }
        Some(object)
    }
}

impl ContentSource for FsContentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<SourceObject>> {
        // A missing root is an error, not an empty source (which would delete everything)
        fs::metadata(&self.root)?;

        let mut builder = WalkBuilder::new(&self.root);
        // Skip hidden files and do not follow symlinks
        builder.hidden(true);
        builder.follow_links(false);

        // A partial listing is never returned: the stale sweep would treat
        // everything left out as deleted upstream
        let mut objects = Vec::new();
        for entry in builder.build() {
            if cancel.is_cancelled() {
                tracing::debug!("Fetching {} cancelled", self.name);
                return Err(IndexError::Interrupted {
                    operation: format!("fetching source {}", self.name),
                });
            }
            let entry = entry.map_err(|e| {
                tracing::error!("Cannot walk {}: {}", self.root.display(), e);
                io::Error::new(io::ErrorKind::Other, e)
            })?;
            if !entry.file_type().is_some_and(|t| t.is_file()) || !self.wants(entry.path()) {
                continue;
            }
            if let Some(object) = self.object_for(entry.path()) {
                objects.push(object);
            }
        }

        objects.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        tracing::debug!("Source {} yielded {} objects", self.name, objects.len());
        Ok(objects)
    }
}
