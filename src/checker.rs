//! Up-to-date decisions and stale-document cleanup for one update run
//!
//! At construction the checker snapshots `identifier -> doc id` for every
//! document belonging to one content source (`term_key == term_value`).
//! During the run each upstream object is passed to
//! [`UpdateChecker::check_up_to_date`]; at the end
//! [`UpdateChecker::delete_stale_objects`] removes every snapshot entry the
//! run never saw.
//!
//! The snapshot reader stays checked out for the lifetime of the checker so
//! the doc ids in the snapshot remain valid.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::accessor::{IndexAccessor, ReaderLease};
use crate::error::Result;
use crate::location::ReopenMarker;
use crate::store::DocId;

/// Which documents a checker is responsible for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerSettings {
    /// Field marking the owning source, e.g. `source`
    pub term_key: String,
    /// Value of `term_key` for this source
    pub term_value: String,
    /// Field holding the object identifier
    pub id_attribute: String,
}

/// Result of a stale sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StaleSweep {
    /// Identifiers seen during the run
    pub checked: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct UpdateChecker {
    accessor: Arc<IndexAccessor>,
    reopen_marker: ReopenMarker,
    settings: CheckerSettings,
    snapshot_reader: Option<ReaderLease>,
    docs: BTreeMap<String, DocId>,
    seen: HashSet<String>,
}

impl UpdateChecker {
    pub fn new(
        accessor: Arc<IndexAccessor>,
        reopen_marker: ReopenMarker,
        settings: CheckerSettings,
    ) -> Self {
        let mut checker = Self {
            accessor,
            reopen_marker,
            settings,
            snapshot_reader: None,
            docs: BTreeMap::new(),
            seen: HashSet::new(),
        };
        checker.refresh();
        checker
    }

    pub fn settings(&self) -> &CheckerSettings {
        &self.settings
    }

    /// Re-take the snapshot and forget what was seen
    pub fn refresh(&mut self) {
        self.snapshot_reader = None;
        self.seen.clear();
        match self.take_snapshot() {
            Ok((reader, docs)) => {
                tracing::debug!(
                    "Snapshot of {}={} holds {} documents",
                    self.settings.term_key,
                    self.settings.term_value,
                    docs.len()
                );
                self.snapshot_reader = Some(reader);
                self.docs = docs;
            }
            Err(e) => {
                tracing::error!(
                    "Failed to read documents of {}={} from {}: {}",
                    self.settings.term_key,
                    self.settings.term_value,
                    self.accessor.key(),
                    e
                );
                self.docs = BTreeMap::new();
            }
        }
    }

    fn take_snapshot(&self) -> Result<(ReaderLease, BTreeMap<String, DocId>)> {
        // Start from the latest commit, not whatever reader happens to be cached
        self.accessor.reopen()?;
        let reader = self.accessor.reader(false)?;

        let docs = reader
            .term_docs(&self.settings.term_key, &self.settings.term_value)
            .into_iter()
            .filter_map(|doc| {
                let id = reader.document(doc).ok()?.get(&self.settings.id_attribute)?;
                Some((id.to_string(), doc))
            })
            .collect();
        Ok((reader, docs))
    }

    /// Whether the indexed copy of `identifier` matches `timestamp`.
    ///
    /// Every call marks the identifier as seen, so it survives the stale
    /// sweep. A failure to read the stored document answers `true` so the
    /// object is not rewritten on a read error.
    pub fn check_up_to_date(
        &mut self,
        identifier: &str,
        timestamp: Option<&str>,
        timestamp_attribute: &str,
    ) -> bool {
        self.seen.insert(identifier.to_string());

        let Some(timestamp) = timestamp.filter(|t| !t.is_empty()) else {
            return false;
        };
        let Some(&doc) = self.docs.get(identifier) else {
            return false;
        };
        let Some(reader) = &self.snapshot_reader else {
            return false;
        };

        match reader.document(doc) {
            Ok(document) => {
                let up_to_date = document.get(timestamp_attribute) == Some(timestamp);
                if !up_to_date {
                    tracing::debug!("{}: object is not up to date", identifier);
                }
                up_to_date
            }
            Err(e) => {
                tracing::warn!(
                    "Cannot read {} from {}, treating it as up to date: {}",
                    identifier,
                    self.accessor.key(),
                    e
                );
                true
            }
        }
    }

    /// Delete every snapshot document that was not seen during this run.
    ///
    /// Failures are logged per document and do not stop the sweep. The seen
    /// set is cleared afterwards in every case.
    pub fn delete_stale_objects(&mut self) -> StaleSweep {
        let stale: Vec<&str> = self
            .docs
            .keys()
            .filter(|id| !self.seen.contains(id.as_str()))
            .map(String::as_str)
            .collect();

        let mut sweep = StaleSweep {
            checked: self.seen.len(),
            ..StaleSweep::default()
        };
        tracing::debug!(
            "{} objects checked, {} in the index, {} stale",
            sweep.checked,
            self.docs.len(),
            stale.len()
        );

        if !stale.is_empty() {
            match self.accessor.reader(true) {
                Ok(writing) => {
                    for id in &stale {
                        match self.delete_one(&writing, id) {
                            Ok(0) => tracing::debug!("{} was already gone", id),
                            Ok(_) => sweep.deleted += 1,
                            Err(e) => {
                                tracing::error!("Cannot delete {} from the index: {}", id, e);
                                sweep.failed += 1;
                            }
                        }
                    }
                    // Dropping the lease commits
                }
                Err(e) => {
                    tracing::error!("Cannot open {} for deleting: {}", self.accessor.key(), e);
                    sweep.failed = stale.len();
                }
            }
        }

        if sweep.deleted > 0 {
            if let Err(e) = self.reopen_marker.create() {
                tracing::error!("Failed to create reopen marker: {}", e);
            }
        }

        self.seen.clear();
        sweep
    }

    fn delete_one(&self, writing: &ReaderLease, identifier: &str) -> Result<usize> {
        let mut deleted = 0;
        for doc in writing.term_docs(&self.settings.id_attribute, identifier) {
            let owned = writing
                .document(doc)?
                .matches_term(&self.settings.term_key, &self.settings.term_value);
            if owned && writing.delete_document(doc)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn snapshot_len(&self) -> usize {
        self.docs.len()
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }
}
