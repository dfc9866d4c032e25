//! Minimal document store used as the index engine
//!
//! The lifecycle code only needs a handful of engine capabilities: open a
//! point-in-time reader, look documents up by position or by term, delete
//! through a writable reader, rewrite through a writer, and detect whether the
//! directory changed since a reader was opened. This module provides exactly
//! that on top of two [`Directory`] backends.
//!
//! # Layout on disk (`FsDirectory`)
//!
//! ```text
//! <index dir>/
//!   segments.json   all live documents + generation
//!   segments.gen    generation number (cheap change detection)
//!   write.lock      archive lock token (owned by the archiver)
//!   reopen          marker asking readers to pick up changes
//! ```

pub mod directory;
pub mod reader;
pub mod searcher;
pub mod writer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use directory::{Directory, DirectoryKey, FsDirectory, MemoryDirectory, Segment};
pub use reader::IndexReader;
pub use searcher::{IndexSearcher, SearchHit};
pub use writer::IndexWriter;

/// Position of a document inside one reader's snapshot
pub type DocId = usize;

/// A stored document: field name -> string value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Exact (untokenized) field match
    pub fn matches_term(&self, field: &str, value: &str) -> bool {
        self.get(field) == Some(value)
    }
}

/// Token normalization applied by searchers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    /// Split on whitespace, keep case
    Whitespace,
    /// Split on non-alphanumeric characters and lowercase
    #[default]
    Lowercase,
}

impl Analyzer {
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        match self {
            Analyzer::Whitespace => text.split_whitespace().map(str::to_string).collect(),
            Analyzer::Lowercase => text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(str::to_lowercase)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_builder_and_term_match() {
        let doc = Document::new()
            .with("contentid", "10007.12")
            .with("updatetimestamp", "1700000000");

        assert_eq!(doc.get("contentid"), Some("10007.12"));
        assert!(doc.matches_term("contentid", "10007.12"));
        assert!(!doc.matches_term("contentid", "10007"));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_analyzers() {
        assert_eq!(
            Analyzer::Whitespace.tokenize("Hello  World-Wide"),
            vec!["Hello", "World-Wide"]
        );
        assert_eq!(
            Analyzer::Lowercase.tokenize("Hello  World-Wide"),
            vec!["hello", "world", "wide"]
        );
    }
}
