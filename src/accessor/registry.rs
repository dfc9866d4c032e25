//! Directory-keyed accessor registry
//!
//! One [`IndexAccessor`] per physical directory, shared by every location,
//! job and archiver that touches it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::IndexAccessor;
use crate::error::{IndexError, Result};
use crate::store::{Analyzer, Directory, DirectoryKey};

#[derive(Debug, Default)]
pub struct AccessorRegistry {
    accessors: RwLock<HashMap<DirectoryKey, Arc<IndexAccessor>>>,
    /// Set by `close()`, cleared by `reopen()`
    closed: AtomicBool,
}

impl AccessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the accessor for `directory`, creating it on first use.
    ///
    /// The analyzer only applies when the accessor is created.
    pub fn create_accessor(
        &self,
        directory: Arc<dyn Directory>,
        analyzer: Analyzer,
    ) -> Result<Arc<IndexAccessor>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::AccessorClosed {
                directory: directory.key().to_string(),
            });
        }

        if let Some(existing) = self.accessors.read().get(directory.key()) {
            return Ok(existing.clone());
        }

        let mut accessors = self.accessors.write();
        let accessor = accessors
            .entry(directory.key().clone())
            .or_insert_with(|| {
                tracing::debug!("Creating accessor for {}", directory.key());
                Arc::new(IndexAccessor::new(directory.clone(), analyzer))
            })
            .clone();
        Ok(accessor)
    }

    pub fn get_accessor(&self, key: &DirectoryKey) -> Result<Arc<IndexAccessor>> {
        self.accessors
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| IndexError::UnknownDirectory {
                directory: key.to_string(),
            })
    }

    pub fn remove(&self, key: &DirectoryKey) -> Option<Arc<IndexAccessor>> {
        self.accessors.write().remove(key)
    }

    /// Close every accessor and refuse new ones until [`AccessorRegistry::reopen`].
    ///
    /// Accessors still in use are logged and dropped from the registry.
    /// Returns how many of them there were.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Arc<IndexAccessor>> =
            self.accessors.write().drain().map(|(_, a)| a).collect();

        let in_use = drained
            .iter()
            .filter(|accessor| accessor.close().is_err())
            .count();
        if in_use > 0 {
            tracing::warn!("{} accessor(s) were still in use at shutdown", in_use);
        }
        in_use
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.accessors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsDirectory, MemoryDirectory};
    use tempfile::tempdir;

    #[test]
    fn test_create_accessor_is_idempotent_per_directory() {
        let tmp = tempdir().unwrap();
        let registry = AccessorRegistry::new();

        let a = registry
            .create_accessor(Arc::new(FsDirectory::open(tmp.path()).unwrap()), Analyzer::Lowercase)
            .unwrap();
        // Second handle on the same path maps to the same accessor
        let b = registry
            .create_accessor(Arc::new(FsDirectory::open(tmp.path()).unwrap()), Analyzer::Whitespace)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.analyzer(), Analyzer::Lowercase);
        assert_eq!(registry.len(), 1);

        let c = registry
            .create_accessor(Arc::new(MemoryDirectory::new()), Analyzer::Lowercase)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_unknown_accessor() {
        let registry = AccessorRegistry::new();
        let dir = MemoryDirectory::new();
        assert!(matches!(
            registry.get_accessor(dir.key()),
            Err(IndexError::UnknownDirectory { .. })
        ));
    }

    #[test]
    fn test_close_and_reopen_registry() {
        let registry = AccessorRegistry::new();
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let accessor = registry.create_accessor(dir.clone(), Analyzer::Lowercase).unwrap();
        let lease = accessor.reader(false).unwrap();

        assert_eq!(registry.close(), 1);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.create_accessor(dir.clone(), Analyzer::Lowercase),
            Err(IndexError::AccessorClosed { .. })
        ));
        drop(lease);

        registry.reopen();
        let fresh = registry.create_accessor(dir, Analyzer::Lowercase).unwrap();
        assert!(!Arc::ptr_eq(&accessor, &fresh));
    }
}
