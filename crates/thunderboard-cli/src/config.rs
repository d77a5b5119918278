//! Configuration file management.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use thunderboard_core::ConnectionConfig;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default board name or identifier
    #[serde(default)]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Environment demo polling interval in seconds
    #[serde(default)]
    pub poll_interval: Option<u64>,

    /// Board aliases (friendly name -> board name or identifier)
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thunderboard")
            .join("config.toml")
    }

    /// Load config from the default location, or return default if not found.
    ///
    /// A file that exists but cannot be parsed is reported and ignored.
    pub fn load() -> Self {
        match Self::load_from(&Self::path()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load config from `path`. A missing file yields the default config.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Connection settings for the core, with this file's overrides applied.
    ///
    /// `timeout` from the command line wins over the file.
    pub fn connection_config(&self, timeout: Option<u64>) -> Result<ConnectionConfig> {
        let mut connection = ConnectionConfig::default();
        if let Some(secs) = timeout.or(self.timeout) {
            connection = connection.connection_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.poll_interval {
            connection = connection.environment_poll_interval(Duration::from_secs(secs));
        }
        connection
            .validate()
            .context("Invalid connection settings")?;
        Ok(connection)
    }
}

/// Resolve the board to use from the argument or the config default.
/// Aliases are resolved in both cases.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .or_else(|| config.device.clone())
        .map(|d| resolve_alias(&d, config))
}

/// Like [`resolve_device`], but fails with a hint when nothing is configured.
pub fn require_device(device: Option<String>, config: &Config) -> Result<String> {
    match resolve_device(device, config) {
        Some(device) => Ok(device),
        None => bail!(
            "No board specified. Use --device <NAME>, set THUNDERBOARD_DEVICE, \
             or set `device` in {}.\nRun 'thunderboard scan' to find nearby boards.",
            Config::path().display()
        ),
    }
}

/// Resolve an alias to its board identifier, or return the original if not an alias.
pub fn resolve_alias(device: &str, config: &Config) -> String {
    config
        .aliases
        .get(device)
        .cloned()
        .unwrap_or_else(|| device.to_string())
}
