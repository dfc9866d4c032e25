//! Filesystem helpers shared by the document store and the archiver
//!
//! - `atomic_rename`: replace a file in one step (Windows needs an explicit delete)
//! - `write_atomic`: write through a sibling temp file, then rename into place
//! - `file_age`: how long ago a file was last modified
//! - `is_dir_writable`: permission check used before taking the archive lock
//! - `default_config_path`: platform-appropriate configuration location

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Cross-platform atomic rename that handles Windows file replacement.
///
/// On Unix, `fs::rename` atomically replaces the target if it exists.
/// On Windows, `fs::rename` fails if the target exists, so the target is
/// deleted first.
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if dst.exists() {
            fs::remove_file(dst)?;
        }
    }
    fs::rename(src, dst)
}

/// Write `contents` to `path` so that readers only ever see the old or the
/// new file, never a partially written one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    if let Err(e) = atomic_rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Time elapsed since the file was last modified.
///
/// A modification time in the future counts as zero age.
pub fn file_age(path: &Path) -> io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

/// Check whether new files can be created in `dir`.
pub fn is_dir_writable(dir: &Path) -> bool {
    match fs::metadata(dir) {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => false,
    }
}

/// Default configuration file location.
///
/// - **Linux/macOS**: `$XDG_CONFIG_HOME/indexkeeper/config.toml` or `~/.config/indexkeeper/config.toml`
/// - **Windows**: `%APPDATA%\indexkeeper\config.toml`
/// - **Fallback**: `./indexkeeper.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("indexkeeper").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("indexkeeper.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_rename_replaces_existing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("new.txt");
        let dst = dir.path().join("existing.txt");

        fs::write(&dst, "old content").unwrap();
        fs::write(&src, "new content").unwrap();

        atomic_rename(&src, &dst).unwrap();

        assert!(!src.exists(), "Source should not exist after rename");
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new content");
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("segments.json");

        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_file_age_of_fresh_file_is_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh");
        fs::write(&path, "x").unwrap();

        let age = file_age(&path).unwrap();
        assert!(age < Duration::from_secs(60));
    }

    #[test]
    fn test_is_dir_writable() {
        let dir = tempdir().unwrap();
        assert!(is_dir_writable(dir.path()));
        assert!(!is_dir_writable(&dir.path().join("missing")));
    }

    #[test]
    fn test_default_config_path_names_the_tool() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("indexkeeper"));
    }
}
