//! Configuration module for devtk-rs
//!
//! This module handles loading and saving the application configuration.
//!
//! # Config Location
//!
//! The default configuration file lives in the platform-appropriate config
//! directory under `dev.devtk.devtk-rs`:
//! - **Linux**: `~/.config/dev.devtk.devtk-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.devtk.devtk-rs/config.toml`
//! - **Windows**: `%APPDATA%\dev.devtk.devtk-rs\config.toml`
//!
//! # Formats
//!
//! Files ending in `.json` are parsed as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```ignore
//! use devtk_rs::config::Config;
//!
//! let config = Config::load_or_default();
//! config.save("devtk.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{DevtkError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.devtk.devtk-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// On-disk encoding of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Plot manager settings
    #[serde(default)]
    pub plot: PlotConfig,

    /// Device session settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a string in the given format
    fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| DevtkError::Serialization(format!("Invalid JSON config: {}", e))),
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| DevtkError::Serialization(format!("Invalid TOML config: {}", e))),
        }
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DevtkError::Configuration(format!("Failed to read config {:?}: {}", path, e))
        })?;
        Self::parse(&content, ConfigFormat::for_path(path))
    }

    /// Load the default config file, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            tracing::warn!("Could not determine config directory, using defaults");
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}, using defaults: {}", path, e);
            Self::default()
        })
    }

    /// Save the configuration to disk, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::for_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| DevtkError::Serialization(format!("Failed to encode config: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| DevtkError::Serialization(format!("Failed to encode config: {}", e)))?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {:?}", path))?;
        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }
}
