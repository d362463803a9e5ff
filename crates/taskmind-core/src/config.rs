use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Top-level configuration for Taskmind.
///
/// Loaded from `~/.taskmind/config.toml` by default. Every section falls back
/// to its defaults when omitted from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskmindConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl TaskmindConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TaskmindConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Full path of the SQLite database file: `data_dir` joined with
    /// `storage.database_file`, with a leading `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.database_file)
    }
}

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~`, or environments without `HOME`/`USERPROFILE`,
/// are returned unchanged.
pub fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some(rest) => rest.trim_start_matches(['/', '\\']),
        None => return PathBuf::from(raw),
    };
    let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"));
    match home {
        Ok(home) if rest.is_empty() => PathBuf::from(home),
        Ok(home) => PathBuf::from(home).join(rest),
        Err(_) => PathBuf::from(raw),
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.taskmind/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// SQLite storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name, relative to `general.data_dir`.
    pub database_file: String,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Page cache size in KiB.
    pub cache_size_kib: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "taskmind.db".to_string(),
            busy_timeout_ms: 5000,
            cache_size_kib: 65536,
        }
    }
}

/// Memory recall settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Minimum lexical similarity for `find_similar` results (0.0 to 1.0).
    pub similarity_threshold: f64,
    /// Maximum number of `find_similar` results.
    pub similarity_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            similarity_limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskmindError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = TaskmindConfig::default();
        assert_eq!(config.general.data_dir, "~/.taskmind/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.database_file, "taskmind.db");
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert_eq!(config.memory.similarity_threshold, 0.5);
        assert_eq!(config.memory.similarity_limit, 10);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"

[storage]
database_file = "work.db"
busy_timeout_ms = 250
cache_size_kib = 2048

[memory]
similarity_threshold = 0.3
similarity_limit = 25
"#;
        let file = create_temp_config(content);
        let config = TaskmindConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.storage.database_file, "work.db");
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert_eq!(config.storage.cache_size_kib, 2048);
        assert_eq!(config.memory.similarity_threshold, 0.3);
        assert_eq!(config.memory.similarity_limit, 25);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = TaskmindConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.general.data_dir, "~/.taskmind/data");
        assert_eq!(config.storage.database_file, "taskmind.db");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[general\nlog_level = ");
        let result = TaskmindConfig::load(file.path());
        assert!(matches!(result, Err(TaskmindError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = TaskmindConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.taskmind/data");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TaskmindConfig::default();
        config.memory.similarity_limit = 3;
        config.save(&path).unwrap();

        let reloaded = TaskmindConfig::load(&path).unwrap();
        assert_eq!(reloaded.memory.similarity_limit, 3);
        assert_eq!(reloaded.general.data_dir, config.general.data_dir);
    }

    #[test]
    fn test_database_path_joins_data_dir() {
        let mut config = TaskmindConfig::default();
        config.general.data_dir = "/var/lib/taskmind".to_string();
        config.storage.database_file = "main.db".to_string();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/taskmind/main.db")
        );
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/data"), PathBuf::from("/tmp/data"));
        assert_eq!(expand_home("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn test_expand_home_replaces_tilde() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_home("~/.taskmind/data"),
                PathBuf::from(home).join(".taskmind/data")
            );
        }
    }
}
