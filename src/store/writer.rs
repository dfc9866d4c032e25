//! Buffered writer over a directory

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Directory, Document};
use crate::error::Result;

struct WriterState {
    docs: Vec<Document>,
    /// Changes not yet committed
    dirty: bool,
}

/// Buffers additions and deletions until [`IndexWriter::commit`].
///
/// The accessor hands out at most one writer per directory, so the buffer
/// starts from the latest generation and commit simply replaces it.
pub struct IndexWriter {
    directory: Arc<dyn Directory>,
    state: Mutex<WriterState>,
}

impl IndexWriter {
    pub fn open(directory: Arc<dyn Directory>) -> Result<Self> {
        let segment = directory.read_segment()?;
        tracing::debug!(
            "Opened writer on {} (generation {})",
            directory.key(),
            segment.generation
        );
        Ok(Self {
            directory,
            state: Mutex::new(WriterState {
                docs: segment.documents,
                dirty: false,
            }),
        })
    }

    pub fn add_document(&self, doc: Document) {
        let mut state = self.state.lock();
        state.docs.push(doc);
        state.dirty = true;
    }

    /// Replace every document with `field == value` by `doc`
    pub fn update_document(&self, field: &str, value: &str, doc: Document) {
        let mut state = self.state.lock();
        state.docs.retain(|d| !d.matches_term(field, value));
        state.docs.push(doc);
        state.dirty = true;
    }

    /// Returns the number of documents removed
    pub fn delete_documents(&self, field: &str, value: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.docs.len();
        state.docs.retain(|d| !d.matches_term(field, value));
        let removed = before - state.docs.len();
        if removed > 0 {
            state.dirty = true;
        }
        removed
    }

    pub fn delete_all(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.docs.len();
        state.docs.clear();
        state.dirty = true;
        removed
    }

    /// Force the next commit to rewrite the segment even without changes
    pub fn optimize(&self) {
        self.state.lock().dirty = true;
    }

    pub fn num_docs(&self) -> usize {
        self.state.lock().docs.len()
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.state.lock().dirty
    }

    /// Write buffered changes. Returns whether a new generation was written.
    pub fn commit(&self) -> Result<bool> {
        let docs = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            state.docs.clone()
        };

        if let Err(e) = self.directory.write_segment(docs) {
            self.state.lock().dirty = true;
            return Err(e);
        }
        Ok(true)
    }
}

impl fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexWriter")
            .field("directory", self.directory.key())
            .field("docs", &self.num_docs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IndexReader, MemoryDirectory};

    #[test]
    fn test_update_replaces_by_term() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let writer = IndexWriter::open(dir.clone()).unwrap();

        writer.add_document(Document::new().with("contentid", "A").with("v", "1"));
        writer.update_document(
            "contentid",
            "A",
            Document::new().with("contentid", "A").with("v", "2"),
        );
        assert_eq!(writer.num_docs(), 1);
        assert!(writer.commit().unwrap());

        let reader = IndexReader::open(dir, false).unwrap();
        let docs = reader.term_docs("contentid", "A");
        assert_eq!(docs.len(), 1);
        assert_eq!(reader.document(docs[0]).unwrap().get("v"), Some("2"));
    }

    #[test]
    fn test_commit_without_changes_is_noop() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let writer = IndexWriter::open(dir.clone()).unwrap();
        assert!(!writer.commit().unwrap());
        assert_eq!(dir.generation().unwrap(), 0);

        writer.optimize();
        assert!(writer.commit().unwrap());
        assert_eq!(dir.generation().unwrap(), 1);
    }

    #[test]
    fn test_delete_documents_and_delete_all() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::with_documents(vec![
            Document::new().with("source", "a"),
            Document::new().with("source", "a"),
            Document::new().with("source", "b"),
        ]));
        let writer = IndexWriter::open(dir).unwrap();

        assert_eq!(writer.delete_documents("source", "a"), 2);
        assert_eq!(writer.delete_documents("source", "zzz"), 0);
        assert_eq!(writer.delete_all(), 1);
        assert_eq!(writer.num_docs(), 0);
    }
}
