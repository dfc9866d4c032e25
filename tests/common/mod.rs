//! Shared fixtures for indexkeeper integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use indexkeeper::{Event, EventReceiver, IndexController, IndexerConfig, JobQueueMetadata};

/// Temporary content tree plus an index directory, wired into one config
pub struct TestSetup {
    dir: TempDir,
}

impl TestSetup {
    pub fn new() -> Self {
        let setup = Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        };
        fs::create_dir_all(setup.content_dir()).expect("Failed to create content dir");
        setup
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn content_dir(&self) -> PathBuf {
        self.path().join("content")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.path().join("docs").join("index")
    }

    pub fn suggest_dir(&self) -> PathBuf {
        self.path().join("docs").join("suggest")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.path().join("docs").join("docs.tar.gz")
    }

    /// Add (or overwrite) a content file
    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.content_dir().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    pub fn remove_file(&self, relative_path: &str) {
        fs::remove_file(self.content_dir().join(relative_path)).expect("Failed to remove file");
    }

    /// One index "docs" with a filesystem source over the content dir
    pub fn config(&self, extra: &str) -> IndexerConfig {
        let toml = format!(
            r#"
[[index]]
name = "docs"
path = "{index}"
suggestion_path = "{suggest}"
{extra}

[index.queue]
check_interval = 1

[[index.source]]
name = "files"
kind = "filesystem"
root = "{content}"
extensions = ["md", "txt"]
"#,
            index = self.index_dir().display(),
            suggest = self.suggest_dir().display(),
            content = self.content_dir().display(),
            extra = extra,
        );
        IndexerConfig::from_toml_str(&toml).expect("Invalid test config")
    }

    pub fn controller(&self, extra: &str) -> IndexController {
        IndexController::from_config(&self.config(extra)).expect("Failed to build controller")
    }
}

/// Poll `condition` for up to five seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Records every finished event it sees
#[derive(Default)]
pub struct FinishedRecorder {
    pub seen: Mutex<Vec<JobQueueMetadata>>,
}

impl FinishedRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl EventReceiver for FinishedRecorder {
    fn process_event(&self, event: &Event) {
        if let Event::JobQueueFinished(meta) = event {
            self.seen.lock().push(meta.clone());
        }
    }
}

/// Live `contentid` values of an index, sorted
pub fn indexed_ids(controller: &IndexController, index: &str) -> Vec<String> {
    let location = controller.location(index).expect("Unknown index");
    location.accessor().reopen().expect("Reopen failed");
    let reader = location.accessor().reader(false).expect("No reader");
    let mut ids: Vec<String> = reader
        .live_docs()
        .into_iter()
        .filter_map(|doc| {
            reader
                .document(doc)
                .ok()?
                .get("contentid")
                .map(str::to_string)
        })
        .collect();
    ids.sort();
    ids
}
