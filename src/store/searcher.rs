//! Token-match searcher bound to one reader

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::{Analyzer, DocId, Document, IndexReader};

/// One matching document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub doc: DocId,
    /// Number of distinct query tokens found in the field
    pub score: usize,
}

#[derive(Debug)]
pub struct IndexSearcher {
    reader: Arc<IndexReader>,
    analyzer: Analyzer,
}

impl IndexSearcher {
    pub fn new(reader: Arc<IndexReader>, analyzer: Analyzer) -> Self {
        Self { reader, analyzer }
    }

    pub fn reader(&self) -> &Arc<IndexReader> {
        &self.reader
    }

    pub fn analyzer(&self) -> Analyzer {
        self.analyzer
    }

    /// Documents whose `field` shares tokens with `text`, best first
    pub fn search(&self, field: &str, text: &str, limit: usize) -> Vec<SearchHit> {
        let query: BTreeSet<String> = self.analyzer.tokenize(text).into_iter().collect();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .reader
            .live_docs()
            .into_iter()
            .filter_map(|doc| {
                let value = self.reader.document(doc).ok()?.get(field)?;
                let tokens: BTreeSet<String> =
                    self.analyzer.tokenize(value).into_iter().collect();
                let score = query.intersection(&tokens).count();
                (score > 0).then_some(SearchHit { doc, score })
            })
            .collect();

        hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.doc.cmp(&b.doc)));
        hits.truncate(limit);
        hits
    }

    pub fn document(&self, hit: &SearchHit) -> Option<&Document> {
        self.reader.document(hit.doc).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Directory, MemoryDirectory};

    fn searcher(analyzer: Analyzer) -> IndexSearcher {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::with_documents(vec![
            Document::new().with("content", "Rust job queue"),
            Document::new().with("content", "queue and reopen of the Queue reader"),
            Document::new().with("title", "no content field"),
        ]));
        IndexSearcher::new(Arc::new(IndexReader::open(dir, false).unwrap()), analyzer)
    }

    #[test]
    fn test_search_ranks_by_matching_tokens() {
        let searcher = searcher(Analyzer::Lowercase);
        let hits = searcher.search("content", "queue reader", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], SearchHit { doc: 1, score: 2 });
        assert_eq!(hits[1], SearchHit { doc: 0, score: 1 });
    }

    #[test]
    fn test_whitespace_analyzer_is_case_sensitive() {
        let searcher = searcher(Analyzer::Whitespace);
        let hits = searcher.search("content", "Queue", 10);
        assert_eq!(hits, vec![SearchHit { doc: 1, score: 1 }]);
    }

    #[test]
    fn test_limit_and_empty_query() {
        let searcher = searcher(Analyzer::Lowercase);
        assert_eq!(searcher.search("content", "queue", 1).len(), 1);
        assert!(searcher.search("content", "  ", 10).is_empty());
    }
}
