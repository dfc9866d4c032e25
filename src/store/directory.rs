//! Storage backends for index documents

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::Document;
use crate::error::Result;
use crate::fs_utils::write_atomic;

const SEGMENTS_FILE: &str = "segments.json";
const GENERATION_FILE: &str = "segments.gen";

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a physical index directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DirectoryKey {
    Path(PathBuf),
    Memory(u64),
}

impl fmt::Display for DirectoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryKey::Path(path) => write!(f, "{}", path.display()),
            DirectoryKey::Memory(id) => write!(f, "memory:{}", id),
        }
    }
}

/// All live documents of one committed generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Segment {
    pub generation: u64,
    pub documents: Vec<Document>,
}

/// A place where committed documents live.
///
/// Every commit produces a new, strictly larger generation; comparing a
/// reader's generation with [`Directory::generation`] is how reopen decides
/// whether anything changed.
pub trait Directory: Send + Sync + fmt::Debug {
    fn key(&self) -> &DirectoryKey;

    /// Filesystem location, if the directory is backed by one
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Generation of the latest commit (0 for an empty directory)
    fn generation(&self) -> Result<u64>;

    fn read_segment(&self) -> Result<Segment>;

    /// Replace the directory contents, returning the new generation
    fn write_segment(&self, documents: Vec<Document>) -> Result<u64>;
}

/// In-process directory, mainly for tests and throwaway indexes
#[derive(Debug)]
pub struct MemoryDirectory {
    key: DirectoryKey,
    segment: RwLock<Segment>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            key: DirectoryKey::Memory(NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed)),
            segment: RwLock::new(Segment::default()),
        }
    }

    /// Create a directory that already holds one committed generation
    pub fn with_documents(documents: Vec<Document>) -> Self {
        let dir = Self::new();
        *dir.segment.write() = Segment {
            generation: 1,
            documents,
        };
        dir
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory for MemoryDirectory {
    fn key(&self) -> &DirectoryKey {
        &self.key
    }

    fn generation(&self) -> Result<u64> {
        Ok(self.segment.read().generation)
    }

    fn read_segment(&self) -> Result<Segment> {
        Ok(self.segment.read().clone())
    }

    fn write_segment(&self, documents: Vec<Document>) -> Result<u64> {
        let mut segment = self.segment.write();
        segment.generation += 1;
        segment.documents = documents;
        Ok(segment.generation)
    }
}

/// Directory persisted as JSON files inside a filesystem directory
#[derive(Debug)]
pub struct FsDirectory {
    key: DirectoryKey,
    root: PathBuf,
}

impl FsDirectory {
    /// Open (creating if needed) an index directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        let root = fs::canonicalize(path)?;
        Ok(Self {
            key: DirectoryKey::Path(root.clone()),
            root,
        })
    }

    fn segments_path(&self) -> PathBuf {
        self.root.join(SEGMENTS_FILE)
    }

    fn generation_path(&self) -> PathBuf {
        self.root.join(GENERATION_FILE)
    }
}

impl Directory for FsDirectory {
    fn key(&self) -> &DirectoryKey {
        &self.key
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn generation(&self) -> Result<u64> {
        match fs::read_to_string(self.generation_path()) {
            Ok(content) => content.trim().parse::<u64>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt {}: {}", GENERATION_FILE, e),
                )
                .into()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn read_segment(&self) -> Result<Segment> {
        match fs::read(self.segments_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Segment::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_segment(&self, documents: Vec<Document>) -> Result<u64> {
        let generation = self.generation()? + 1;
        let segment = Segment {
            generation,
            documents,
        };
        let json = serde_json::to_vec(&segment)?;

        // Documents first, then the generation: a reader that sees the new
        // generation always finds the matching documents.
        write_atomic(&self.segments_path(), &json)?;
        write_atomic(&self.generation_path(), generation.to_string().as_bytes())?;

        tracing::debug!(
            "Committed generation {} ({} documents) to {}",
            generation,
            segment.documents.len(),
            self.root.display()
        );
        Ok(generation)
    }
}
