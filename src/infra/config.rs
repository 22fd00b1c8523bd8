//! Configuration management infrastructure.
//!
//! Timeout and diagnostic settings for the transport layer, persisted as
//! a TOML file in the user's config directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::infra::error::{TokenError, TokenResult};

/// Transport and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Timeout for one USB bulk transfer, in seconds
    pub usb_timeout_seconds: u64,

    /// Timeout for the ICC power-on phase, in seconds.
    ///
    /// Much longer than the transfer timeout so slow card self-tests are
    /// not cancelled mid-run.
    pub power_on_timeout_seconds: u64,

    /// Timeout for establishing the NFC ISO-DEP link, in seconds.
    ///
    /// Long enough to cover on-card RSA/ECC computation.
    pub nfc_timeout_seconds: u64,

    /// Whether to log wire-level traffic at debug level
    pub verbose: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            usb_timeout_seconds: 20,
            power_on_timeout_seconds: 100,
            nfc_timeout_seconds: 100,
            verbose: false,
        }
    }
}

/// Configuration manager for handling config files
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> TokenResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> TokenResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("openpgp-token").join("config.toml"))
        } else {
            Ok(PathBuf::from("openpgp-token-config.toml"))
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create_default(&self) -> TokenResult<TokenConfig> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = TokenConfig::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> TokenResult<TokenConfig> {
        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            TokenError::ConfigurationError(format!(
                "failed to read config file {}: {e}",
                self.config_path.display()
            ))
        })?;

        let config: TokenConfig = toml::from_str(&content).map_err(|e| {
            TokenError::ConfigurationError(format!(
                "failed to parse config file {}: {e}",
                self.config_path.display()
            ))
        })?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &TokenConfig) -> TokenResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TokenError::ConfigurationError(format!(
                    "failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            TokenError::ConfigurationError(format!("failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            TokenError::ConfigurationError(format!(
                "failed to write config file {}: {e}",
                self.config_path.display()
            ))
        })?;

        Ok(())
    }
}
