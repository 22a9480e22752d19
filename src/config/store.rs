//! Persistence collaborator for the configuration document and all
//! daemon state files.
//!
//! Everything lives under one owner-only state directory
//! (`~/.evod` by default, `EVOD_STATE_DIR` to override). Full-file
//! replacements go through a temp-file + rename so readers never see a
//! half-written document.

use crate::config::schema::AgentConfig;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves the state directory and reads/writes the configuration
/// document and its derived snapshots.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    state_dir: PathBuf,
}

impl ConfigStore {
    /// Open the default state directory, creating it if missing.
    pub fn open() -> Result<Self> {
        let dir = match std::env::var("EVOD_STATE_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = UserDirs::new()
                    .map(|u| u.home_dir().to_path_buf())
                    .context("Could not find home directory")?;
                home.join(".evod")
            }
        };
        Self::at(dir)
    }

    /// Open an explicit state directory (used by `--state-dir` and tests).
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = dir.into();
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;
        restrict_dir(&state_dir);
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }

    /// The primary best-configuration snapshot written by the optimizer
    /// and by clone promotion.
    pub fn models_path(&self) -> PathBuf {
        self.state_dir.join("models.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("daemon.lock")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("daemon-status.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.state_dir.join("metrics.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir.join("replication-manifest.json")
    }

    pub fn clones_dir(&self) -> PathBuf {
        self.state_dir.join("clones")
    }

    /// Load a fresh, deep-copyable snapshot of the configuration
    /// document. A missing file yields the default document.
    pub fn load_snapshot(&self) -> Result<AgentConfig> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(AgentConfig::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Persist the configuration document.
    pub fn write_config(&self, config: &AgentConfig) -> Result<()> {
        self.write_json(&self.config_path(), config)
    }

    /// Persist a configuration snapshot to `models.json`.
    pub fn write_models(&self, config: &AgentConfig) -> Result<()> {
        self.write_json(&self.models_path(), config)
    }

    /// Atomic JSON write: temp file in the same directory, then rename.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let parent = path
            .parent()
            .context("State file path must have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

        let json = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
        let file_name = path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("state.json");
        let temp_path = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        fs::write(&temp_path, json.as_bytes())
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        restrict_file(&temp_path);
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace state file: {}", path.display()))?;
        Ok(())
    }
}

/// Restrict a file to owner read/write. Best-effort, unix only.
pub fn restrict_file(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Restrict a directory to owner access. Best-effort, unix only.
pub fn restrict_dir(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o700));
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_loads_default() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        let config = store.load_snapshot().unwrap();
        assert!(config.model.primary.is_none());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();

        let mut config = AgentConfig::default();
        config.model.primary = Some("openrouter/auto".into());
        config.model.fallbacks = Some(vec!["ollama/llama3.2".into()]);
        store.write_config(&config).unwrap();

        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.model.primary.as_deref(), Some("openrouter/auto"));
        assert_eq!(loaded.fallbacks(), ["ollama/llama3.2".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_written_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        store.write_config(&AgentConfig::default()).unwrap();

        let mode = fs::metadata(store.config_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_state_paths_share_one_directory() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        for path in [
            store.config_path(),
            store.models_path(),
            store.lock_path(),
            store.status_path(),
            store.metrics_path(),
            store.manifest_path(),
        ] {
            assert_eq!(path.parent().unwrap(), dir.path());
        }
    }
}
