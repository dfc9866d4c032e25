//! Archive an index location (plus its suggestion index) into `<index>.tar.gz`

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::WalkBuilder;
use serde::Serialize;

use super::{LockFile, WRITE_LOCK_FILE};
use crate::accessor::WriterLease;
use crate::error::{IndexError, Result};
use crate::fs_utils::{file_age, is_dir_writable};
use crate::location::{ArchivePaths, IndexLocation, REOPEN_FILE};

/// What a compress run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived { path: PathBuf, bytes: u64 },
    /// A recent temp file shows another run is still writing
    InProgress,
}

#[derive(Debug)]
struct ArchiveTarget {
    location: Arc<IndexLocation>,
    directory: PathBuf,
    /// Top-level directory name inside the archive
    entry_name: String,
}

/// Exclusive hold on every archived directory.
///
/// The lock files are declared first so they are removed before the writer
/// slots are handed back and queued writers wake up.
pub struct ArchiveGuard {
    _locks: Vec<LockFile>,
    _writers: Vec<WriterLease>,
}

#[derive(Debug)]
pub struct IndexCompressor {
    index: String,
    /// Primary first
    targets: Vec<ArchiveTarget>,
    paths: ArchivePaths,
    max_temp_age: Duration,
}

impl IndexCompressor {
    pub fn for_location(location: &Arc<IndexLocation>, max_temp_age: Duration) -> Result<Self> {
        let index = location.name().to_string();
        let unsupported = |reason: &str| IndexError::Unsupported {
            index: index.clone(),
            reason: reason.to_string(),
        };

        let paths = location
            .archive_paths()
            .ok_or_else(|| unsupported("in-memory indexes cannot be archived"))?;

        let mut locations = vec![location.clone()];
        if let Some(suggestion) = location.suggestion() {
            locations.push(suggestion.clone());
        }

        let mut targets = Vec::with_capacity(locations.len());
        let mut used_names = HashSet::new();
        for loc in locations {
            let directory = loc
                .directory_path()
                .ok_or_else(|| unsupported("in-memory indexes cannot be archived"))?
                .to_path_buf();
            let mut entry_name = directory
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| loc.name().to_string());
            if !used_names.insert(entry_name.clone()) {
                entry_name = loc.name().to_string();
                used_names.insert(entry_name.clone());
            }
            targets.push(ArchiveTarget {
                location: loc,
                directory,
                entry_name,
            });
        }

        Ok(Self {
            index,
            targets,
            paths,
            max_temp_age,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn archive_path(&self) -> &Path {
        &self.paths.archive
    }

    pub fn temp_path(&self) -> &Path {
        &self.paths.temp
    }

    /// Take the writer slot and `write.lock` of every target.
    ///
    /// Fails with [`IndexError::Locked`] while indexing holds a writer or
    /// writing reader, or another archiver holds a lock. Writers in this
    /// process wait for the guard; writers elsewhere see the lock files.
    pub fn lock(&self) -> Result<ArchiveGuard> {
        for target in &self.targets {
            if !is_dir_writable(&target.directory) {
                return Err(IndexError::NotWritable {
                    path: target.directory.clone(),
                });
            }
        }

        let mut writers = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            match target.location.accessor().try_writer()? {
                Some(writer) => writers.push(writer),
                None => {
                    return Err(IndexError::Locked {
                        path: target.directory.clone(),
                    })
                }
            }
        }

        let mut locks = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            locks.push(LockFile::acquire_reclaiming(
                &target.directory,
                self.max_temp_age,
            )?);
        }

        Ok(ArchiveGuard {
            _locks: locks,
            _writers: writers,
        })
    }

    pub fn compress(&self) -> Result<ArchiveOutcome> {
        tracing::info!("Start compressing index {}", self.index);

        // Held until the end of this function
        let _guard = self.lock()?;

        if self.paths.temp.exists() {
            let age = file_age(&self.paths.temp)?;
            if age > self.max_temp_age {
                tracing::warn!(
                    "Removing abandoned temp archive {} ({}s old)",
                    self.paths.temp.display(),
                    age.as_secs()
                );
                fs::remove_file(&self.paths.temp)?;
            } else {
                tracing::info!("Archive of {} is already being written", self.index);
                return Ok(ArchiveOutcome::InProgress);
            }
        }

        if let Err(e) = self.write_temp_archive() {
            if let Err(cleanup) = fs::remove_file(&self.paths.temp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::error!(
                        "Cannot remove partial archive {}: {}",
                        self.paths.temp.display(),
                        cleanup
                    );
                }
            }
            tracing::error!("Cannot generate the archive of {}: {}", self.index, e);
            return Err(IndexError::Archive {
                index: self.index.clone(),
                message: e.to_string(),
            });
        }

        let bytes = fs::copy(&self.paths.temp, &self.paths.archive)?;
        fs::remove_file(&self.paths.temp)?;

        tracing::info!(
            "Compressing index {} finished ({} bytes -> {})",
            self.index,
            bytes,
            self.paths.archive.display()
        );
        Ok(ArchiveOutcome::Archived {
            path: self.paths.archive.clone(),
            bytes,
        })
    }

    fn write_temp_archive(&self) -> io::Result<()> {
        let file = File::create(&self.paths.temp)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        for target in &self.targets {
            append_directory(&mut builder, &target.directory, &target.entry_name)?;
        }

        let file = builder.into_inner()?.finish()?;
        file.sync_all()
    }
}

/// Markers that only make sense inside a live index directory
fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == WRITE_LOCK_FILE || name == REOPEN_FILE)
}

fn append_directory<W: io::Write>(
    builder: &mut tar::Builder<W>,
    directory: &Path,
    entry_name: &str,
) -> io::Result<()> {
    let mut walker = WalkBuilder::new(directory);
    // Archive everything, ignore files included
    walker.standard_filters(false);
    walker.follow_links(false);
    walker.sort_by_file_name(|a, b| a.cmp(b));

    for entry in walker.build() {
        let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let path = entry.path();
        if is_excluded(path) {
            continue;
        }
        let relative = path
            .strip_prefix(directory)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let name = Path::new(entry_name).join(relative);

        match entry.file_type() {
            Some(t) if t.is_dir() => builder.append_dir(&name, path)?,
            Some(t) if t.is_file() => builder.append_path_with_name(path, &name)?,
            _ => {}
        }
    }
    Ok(())
}
