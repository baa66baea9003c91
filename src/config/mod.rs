//! Configuration management for netenrich

pub mod schema;

pub use schema::Config;

use crate::error::{EnrichError, EnrichResult};
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
            .join("netenrich")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netenrich")
    }

    /// Cache file path, honoring `cache.path`
    pub fn cache_path(config: &Config) -> PathBuf {
        config
            .cache
            .path
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("cache.json"))
    }

    /// Progress file path, honoring `progress.path`
    pub fn progress_path(config: &Config) -> PathBuf {
        config
            .progress
            .path
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("progress.json"))
    }

    /// Load and validate configuration, using defaults if the file is missing
    pub async fn load(&self) -> EnrichResult<Config> {
        let config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        config.validate(&self.config_path)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> EnrichResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| EnrichError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| EnrichError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> EnrichResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            EnrichError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> EnrichResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EnrichError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
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
