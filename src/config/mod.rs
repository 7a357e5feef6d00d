//! Configuration management for Hangar

pub mod schema;

pub use schema::Config;

use crate::error::{HangarError, HangarResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hangar")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hangar")
    }

    /// Ledger snapshot path, honoring the configured override
    pub fn snapshot_path(config: &Config) -> PathBuf {
        config
            .ledger
            .snapshot_path
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("ledger.json"))
    }

    /// Volume content root, honoring the configured override
    pub fn content_root(config: &Config) -> PathBuf {
        config
            .store
            .content_root
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("volumes"))
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> HangarResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> HangarResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| HangarError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| HangarError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> HangarResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            HangarError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> HangarResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HangarError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure the snapshot and content directories exist
    pub async fn ensure_state_dirs(config: &Config) -> HangarResult<()> {
        let snapshot = Self::snapshot_path(config);
        let mut dirs = vec![Self::content_root(config)];
        if let Some(parent) = snapshot.parent().filter(|p| !p.as_os_str().is_empty()) {
            dirs.push(parent.to_path_buf());
        }

        for dir in &dirs {
            fs::create_dir_all(dir).await.map_err(|e| {
                HangarError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }

        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.api.listen, "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.gc.interval_secs = 5;

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.gc.interval_secs, 5);
    }

    #[tokio::test]
    async fn invalid_config_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "[gc]\ninterval_secs = \"soon\"\n")
            .await
            .unwrap();

        let err = ConfigManager::with_path(path.clone())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, HangarError::ConfigInvalid { path: p, .. } if p == path));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = Config::default();
        config.ledger.snapshot_path = Some(PathBuf::from("/tmp/ledger.json"));
        config.store.content_root = Some(PathBuf::from("/srv/volumes"));

        assert_eq!(
            ConfigManager::snapshot_path(&config),
            PathBuf::from("/tmp/ledger.json")
        );
        assert_eq!(
            ConfigManager::content_root(&config),
            PathBuf::from("/srv/volumes")
        );
    }
}
