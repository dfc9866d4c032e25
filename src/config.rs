//! indexkeeper configuration
//!
//! Read from `~/.config/indexkeeper/config.toml` by default (see
//! [`crate::fs_utils::default_config_path`]). One `[[index]]` table per
//! index location, each with its own queue, archive and source settings.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::jobs::UpdateSettings;
use crate::queue::QueueConfig;
use crate::store::Analyzer;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default, rename = "index")]
    pub indexes: Vec<IndexConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between automatic update rounds; 0 runs one round at start only
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
}

fn default_update_interval() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,

    /// Index directory
    pub path: PathBuf,

    /// Optional did-you-mean index archived together with this one
    #[serde(default)]
    pub suggestion_path: Option<PathBuf>,

    #[serde(default)]
    pub analyzer: Analyzer,

    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,

    #[serde(default = "default_timestamp_attribute")]
    pub timestamp_attribute: String,

    #[serde(default = "default_term_key")]
    pub term_key: String,

    /// Event receiver plugin names
    #[serde(default)]
    pub receivers: Vec<String>,

    /// After-action task plugin names
    #[serde(default)]
    pub after_action_tasks: Vec<String>,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub archive: ArchiveSettings,

    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

fn default_id_attribute() -> String {
    "contentid".to_string()
}

fn default_timestamp_attribute() -> String {
    "updatetimestamp".to_string()
}

fn default_term_key() -> String {
    "source".to_string()
}

impl IndexConfig {
    pub fn update_settings(&self) -> UpdateSettings {
        UpdateSettings {
            id_attribute: self.id_attribute.clone(),
            timestamp_attribute: self.timestamp_attribute.clone(),
            term_key: self.term_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Seconds between queue checks
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Finished jobs kept for display
    #[serde(default = "default_lastjobs_size")]
    pub lastjobs_size: usize,

    #[serde(default)]
    pub hide_empty_jobs: bool,
}

fn default_check_interval() -> u64 {
    5
}

fn default_lastjobs_size() -> usize {
    3
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            lastjobs_size: default_lastjobs_size(),
            hide_empty_jobs: false,
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            check_interval: Duration::from_secs(self.check_interval),
            last_jobs_size: self.lastjobs_size,
            hide_empty_jobs: self.hide_empty_jobs,
            ..QueueConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    /// Minutes after which a leftover temp archive is considered abandoned
    #[serde(default = "default_max_temp_file_age")]
    pub max_temp_file_age: u64,
}

fn default_max_temp_file_age() -> u64 {
    crate::archive::DEFAULT_MAX_TEMP_AGE_MINUTES
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            max_temp_file_age: default_max_temp_file_age(),
        }
    }
}

impl ArchiveSettings {
    pub fn max_temp_age(&self) -> Duration {
        Duration::from_secs(self.max_temp_file_age * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Filesystem {
        name: String,
        root: PathBuf,
        /// Only files with these extensions; empty means all files
        #[serde(default)]
        extensions: Vec<String>,
    },
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Filesystem { name, .. } => name,
        }
    }
}

impl IndexerConfig {
    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| IndexError::Config {
            message: format!("Cannot read {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            "Loaded configuration from {} ({} indexes)",
            path.display(),
            config.indexes.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| IndexError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IndexError::Config {
            message: format!("Failed to serialize config: {}", e),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(IndexError::Config { message });

        let mut names = HashSet::new();
        for index in &self.indexes {
            if index.name.trim().is_empty() {
                return invalid("index name must not be empty".to_string());
            }
            if !names.insert(index.name.as_str()) {
                return invalid(format!("duplicate index name '{}'", index.name));
            }
            if index.path.as_os_str().is_empty() {
                return invalid(format!("index '{}' has an empty path", index.name));
            }
            if index.queue.check_interval == 0 {
                return invalid(format!(
                    "index '{}': queue.check_interval must be positive",
                    index.name
                ));
            }
            if index.queue.lastjobs_size == 0 {
                return invalid(format!(
                    "index '{}': queue.lastjobs_size must be at least 1",
                    index.name
                ));
            }
            let mut sources = HashSet::new();
            for source in &index.sources {
                if !sources.insert(source.name()) {
                    return invalid(format!(
                        "index '{}': duplicate source name '{}'",
                        index.name,
                        source.name()
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FULL: &str = r#"
[logging]
level = "debug"

[scheduler]
update_interval = 60

[[index]]
name = "docs"
path = "/var/lib/indexkeeper/docs/index"
suggestion_path = "/var/lib/indexkeeper/docs/suggest"
analyzer = "whitespace"
receivers = ["compress_index"]

[index.queue]
check_interval = 2
lastjobs_size = 5
hide_empty_jobs = true

[index.archive]
max_temp_file_age = 10

[[index.source]]
name = "files"
kind = "filesystem"
root = "/srv/docs"
extensions = ["md"]
"#;

    #[test]
    fn test_full_config_parses() {
        let config = IndexerConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.scheduler.update_interval, 60);

        let docs = config.index("docs").unwrap();
        assert_eq!(docs.analyzer, Analyzer::Whitespace);
        assert_eq!(docs.id_attribute, "contentid");
        assert_eq!(docs.receivers, vec!["compress_index"]);
        assert_eq!(docs.queue.to_queue_config().check_interval, Duration::from_secs(2));
        assert_eq!(docs.archive.max_temp_age(), Duration::from_secs(600));
        assert_eq!(
            docs.sources,
            vec![SourceConfig::Filesystem {
                name: "files".to_string(),
                root: PathBuf::from("/srv/docs"),
                extensions: vec!["md".to_string()],
            }]
        );
    }

    #[test]
    fn test_defaults() {
        let config = IndexerConfig::from_toml_str(
            r#"
[[index]]
name = "docs"
path = "/tmp/docs"
"#,
        )
        .unwrap();
        let docs = &config.indexes[0];
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.scheduler.update_interval, 300);
        assert_eq!(docs.analyzer, Analyzer::Lowercase);
        assert_eq!(docs.timestamp_attribute, "updatetimestamp");
        assert_eq!(docs.term_key, "source");
        assert_eq!(docs.queue.check_interval, 5);
        assert_eq!(docs.queue.lastjobs_size, 3);
        assert_eq!(docs.archive.max_temp_file_age, 30);
        assert!(docs.suggestion_path.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let duplicate = r#"
[[index]]
name = "docs"
path = "/a"
[[index]]
name = "docs"
path = "/b"
"#;
        assert!(matches!(
            IndexerConfig::from_toml_str(duplicate),
            Err(IndexError::Config { .. })
        ));

        let zero_interval = r#"
[[index]]
name = "docs"
path = "/a"
[index.queue]
check_interval = 0
"#;
        assert!(IndexerConfig::from_toml_str(zero_interval).is_err());
        assert!(IndexerConfig::from_toml_str("[[index]]\nname = 1").is_err());
    }

    #[test]
    fn test_load_from_file_and_roundtrip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, FULL).unwrap();

        let config = IndexerConfig::load_from(&path).unwrap();
        let reparsed = IndexerConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(reparsed.indexes.len(), 1);
        assert_eq!(reparsed.indexes[0].sources, config.indexes[0].sources);

        assert!(IndexerConfig::load_from(&tmp.path().join("missing.toml")).is_err());
    }
}
