//! # strata-config
//!
//! Configuration for a Strata storage node.
//!
//! Loads configuration from:
//! 1. An explicit `--config` path, or `~/.config/strata/storage.toml`
//! 2. Environment variables (highest priority)
//!
//! The loaded config is validated before use and passed by value into the
//! daemon; there is no process-wide config instance.

pub mod logging;
pub mod path;
pub mod testing;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use logging::LogLevel;

pub const ENV_MOUNT_POINT: &str = "STRATA_MOUNT_POINT";
pub const ENV_PORT: &str = "STRATA_PORT";
pub const ENV_LOG_LEVEL: &str = "STRATA_LOG_LEVEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
}

impl Config {
    /// Load from `path` (or the default location when `None`), apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Config::default(),
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Default config path: ~/.config/strata/storage.toml
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("strata/storage.toml"))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var(ENV_MOUNT_POINT) {
            self.storage.mount_point = Some(PathBuf::from(path));
        }
        if let Ok(port) = std::env::var(ENV_PORT) {
            self.storage.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_PORT,
                value: port.clone(),
            })?;
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.storage.log_level = level.parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_LOG_LEVEL,
                value: level.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.storage;
        if s.mount_point.is_none() {
            return Err(ConfigError::Validation(
                "storage.mount_point is not set".into(),
            ));
        }
        if s.port == 0 {
            return Err(ConfigError::Validation("storage.port must be non-zero".into()));
        }
        if s.block_size == 0 || s.fs_size < s.block_size || s.fs_size % s.block_size != 0 {
            return Err(ConfigError::Validation(format!(
                "storage.fs_size ({}) must be a positive multiple of storage.block_size ({})",
                s.fs_size, s.block_size
            )));
        }
        if u32::try_from(s.block_size).is_err() {
            return Err(ConfigError::Validation(format!(
                "storage.block_size ({}) does not fit the handshake's 32-bit field",
                s.block_size
            )));
        }
        Ok(())
    }
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// TCP port workers connect to
    pub port: u16,
    /// Wipe and reformat the mount point on startup
    pub fresh_start: bool,
    pub mount_point: Option<PathBuf>,
    /// Pool size in bytes, used when formatting
    pub fs_size: u64,
    /// Block size in bytes, used when formatting
    pub block_size: u64,
    /// Pause before answering each request
    pub operation_delay_ms: u64,
    /// Pause before each physical block read or write
    pub block_access_delay_ms: u64,
    pub log_level: LogLevel,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            fresh_start: false,
            mount_point: None,
            fs_size: 4096,
            block_size: 128,
            operation_delay_ms: 0,
            block_access_delay_ms: 0,
            log_level: LogLevel::Info,
        }
    }
}

impl StorageConfig {
    pub fn operation_delay(&self) -> Duration {
        Duration::from_millis(self.operation_delay_ms)
    }

    pub fn block_access_delay(&self) -> Duration {
        Duration::from_millis(self.block_access_delay_ms)
    }

    /// Mount point with `~` expanded. Errors when unset.
    pub fn mount_point(&self) -> Result<PathBuf, ConfigError> {
        self.mount_point
            .as_deref()
            .map(path::expand_tilde)
            .ok_or_else(|| ConfigError::Validation("storage.mount_point is not set".into()))
    }
}
