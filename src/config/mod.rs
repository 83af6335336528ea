//! Configuration management for reposerve

pub mod schema;

pub use schema::{CommandSpec, Config, GenerationConfig, PluginConfig, SandboxConfig};

use crate::error::{RepoServeError, RepoServeResult};
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
            .join("reposerve")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file does not exist
    pub async fn load(&self) -> RepoServeResult<Config> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load and validate configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> RepoServeResult<Config> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            RepoServeError::io(format!("reading config from {}", path.display()), e)
        })?;

        let config: Config =
            toml::from_str(&content).map_err(|e| RepoServeError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        validate(&config).map_err(|reason| RepoServeError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> RepoServeResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            RepoServeError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> RepoServeResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RepoServeError::ConfigDirCreate {
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

/// Check invariants serde defaults cannot express
fn validate(config: &Config) -> Result<(), String> {
    if config.generation.parallelism_limit == 0 {
        return Err("generation.parallelism_limit must be at least 1".to_string());
    }
    if config.generation.exec_timeout_secs == 0 {
        return Err("generation.exec_timeout_secs must be at least 1".to_string());
    }
    for plugin in &config.plugins {
        if plugin.generate.command.is_empty() {
            return Err(format!("plugin '{}' has an empty generate command", plugin.name));
        }
    }
    Ok(())
}
