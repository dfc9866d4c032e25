//! `write.lock` token guarding an index directory while it is archived

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::WRITE_LOCK_FILE;
use crate::error::{IndexError, Result};
use crate::fs_utils::file_age;

/// Lock file created with create-new semantics.
///
/// The file is made read-only right after creation so indexing code does
/// not clean it up. It is removed on drop, but only by the instance that
/// created it.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    created_by_us: bool,
}

impl LockFile {
    /// Create `<dir>/write.lock`, failing with [`IndexError::Locked`] if it
    /// already exists.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(WRITE_LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => drop(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(IndexError::Locked { path });
            }
            Err(e) => return Err(e.into()),
        }

        // From here on drop cleans up, including when set_readonly fails
        let lock = Self {
            path,
            created_by_us: true,
        };
        set_readonly(&lock.path, true)?;
        tracing::debug!("Acquired {}", lock.path.display());
        Ok(lock)
    }

    /// Like [`LockFile::acquire`], but a lock older than `max_age` is taken
    /// to be left over from a run that never finished, and is replaced.
    pub fn acquire_reclaiming(dir: &Path, max_age: Duration) -> Result<Self> {
        match Self::acquire(dir) {
            Err(IndexError::Locked { path }) if is_abandoned(&path, max_age) => {
                tracing::warn!("Removing abandoned lock {}", path.display());
                let _ = set_readonly(&path, false);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::acquire(dir)
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_by_us(&self) -> bool {
        self.created_by_us
    }

    /// Whether any lock file is present in `dir`
    pub fn is_locked(dir: &Path) -> bool {
        dir.join(WRITE_LOCK_FILE).exists()
    }

    /// Whether `dir` has a lock that is younger than `max_age`
    pub fn is_held(dir: &Path, max_age: Duration) -> bool {
        let path = dir.join(WRITE_LOCK_FILE);
        path.exists() && !is_abandoned(&path, max_age)
    }
}

fn is_abandoned(path: &Path, max_age: Duration) -> bool {
    // An unreadable age counts as fresh
    file_age(path).is_ok_and(|age| age > max_age)
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.created_by_us {
            return;
        }
        // Windows refuses to delete read-only files
        #[cfg(windows)]
        {
            let _ = set_readonly(&self.path, false);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Released {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!("Cannot remove {}: {}", self.path.display(), e),
        }
    }
}

fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(readonly);
    fs::set_permissions(path, perms)
}
