//! Point-in-time readers over a directory generation

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{DocId, Document, Directory, DirectoryKey};
use crate::error::{IndexError, Result};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable snapshot of one committed generation.
///
/// A writable reader can mark documents deleted; the deletions become visible
/// to other readers only after [`IndexReader::commit`] and a reopen.
pub struct IndexReader {
    /// Unique per opened reader, used for identity checks in tests and logs
    id: u64,
    /// Generation this snapshot was read from
    generation: u64,
    directory: Arc<dyn Directory>,
    docs: Vec<Document>,
    deleted: RwLock<BTreeSet<DocId>>,
    /// Deletions not yet written back
    dirty: AtomicBool,
    writable: bool,
}

impl IndexReader {
    pub fn open(directory: Arc<dyn Directory>, writable: bool) -> Result<Self> {
        let segment = directory.read_segment()?;
        let reader = Self {
            id: NEXT_READER_ID.fetch_add(1, Ordering::Relaxed),
            generation: segment.generation,
            directory,
            docs: segment.documents,
            deleted: RwLock::new(BTreeSet::new()),
            dirty: AtomicBool::new(false),
            writable,
        };
        tracing::debug!(
            "Opened {} reader #{} on {} (generation {}, {} docs)",
            if writable { "writing" } else { "reading" },
            reader.id,
            reader.directory.key(),
            reader.generation,
            reader.docs.len()
        );
        Ok(reader)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn directory_key(&self) -> &DirectoryKey {
        self.directory.key()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of document slots, deleted ones included
    pub fn max_doc(&self) -> usize {
        self.docs.len()
    }

    /// Number of documents not marked deleted
    pub fn num_docs(&self) -> usize {
        self.docs.len() - self.deleted.read().len()
    }

    pub fn has_deletions(&self) -> bool {
        !self.deleted.read().is_empty()
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted.read().contains(&doc)
    }

    /// Stored fields of a live document
    pub fn document(&self, doc: DocId) -> Result<&Document> {
        if self.is_deleted(doc) {
            return Err(IndexError::DocumentNotFound { doc });
        }
        self.docs.get(doc).ok_or(IndexError::DocumentNotFound { doc })
    }

    /// Live documents whose `field` equals `value` exactly
    pub fn term_docs(&self, field: &str, value: &str) -> Vec<DocId> {
        let deleted = self.deleted.read();
        self.docs
            .iter()
            .enumerate()
            .filter(|(doc, d)| !deleted.contains(doc) && d.matches_term(field, value))
            .map(|(doc, _)| doc)
            .collect()
    }

    pub fn live_docs(&self) -> Vec<DocId> {
        let deleted = self.deleted.read();
        (0..self.docs.len())
            .filter(|doc| !deleted.contains(doc))
            .collect()
    }

    /// Mark one document deleted. Returns false if it already was.
    pub fn delete_document(&self, doc: DocId) -> Result<bool> {
        self.ensure_writable()?;
        if doc >= self.docs.len() {
            return Err(IndexError::DocumentNotFound { doc });
        }
        let inserted = self.deleted.write().insert(doc);
        if inserted {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(inserted)
    }

    /// Mark every live document with `field == value` deleted
    pub fn delete_by_term(&self, field: &str, value: &str) -> Result<usize> {
        self.ensure_writable()?;
        let matches = self.term_docs(field, value);
        let mut deleted = self.deleted.write();
        let count = matches.into_iter().filter(|doc| deleted.insert(*doc)).count();
        if count > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(count)
    }

    /// Write pending deletions to the directory.
    ///
    /// Deletions are applied to the directory's latest generation, so a commit
    /// never resurrects or drops documents written after this reader opened.
    /// Returns whether anything was written.
    pub fn commit(&self) -> Result<bool> {
        self.ensure_writable()?;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let current = match self.directory.read_segment() {
            Ok(segment) => segment,
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let deleted = self.deleted.read();
        let remaining: Vec<Document> = if current.generation == self.generation {
            // Same documents in the same order
            current
                .documents
                .into_iter()
                .enumerate()
                .filter(|(doc, _)| !deleted.contains(doc))
                .map(|(_, document)| document)
                .collect()
        } else {
            // Someone committed in between: match by content, one removal
            // per deleted copy
            let mut removed: HashMap<&Document, usize> = HashMap::new();
            for document in deleted.iter().filter_map(|doc| self.docs.get(*doc)) {
                *removed.entry(document).or_default() += 1;
            }
            current
                .documents
                .into_iter()
                .filter(|document| match removed.get_mut(document) {
                    Some(count) if *count > 0 => {
                        *count -= 1;
                        false
                    }
                    _ => true,
                })
                .collect()
        };
        drop(deleted);

        if let Err(e) = self.directory.write_segment(remaining) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        tracing::debug!(
            "Reader #{} committed deletions to {}",
            self.id,
            self.directory.key()
        );
        Ok(true)
    }

    /// Whether the directory still holds the generation this reader sees
    pub fn is_current(&self) -> Result<bool> {
        Ok(self.directory.generation()? == self.generation)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(IndexError::ReadOnlyReader {
                directory: self.directory.key().to_string(),
            })
        }
    }
}

impl fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexReader")
            .field("id", &self.id)
            .field("directory", self.directory.key())
            .field("generation", &self.generation)
            .field("docs", &self.docs.len())
            .field("writable", &self.writable)
            .finish()
    }
}
