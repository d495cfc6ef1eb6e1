//! Tiered store configuration via `tierkv.toml`
//!
//! [`TierConfig::load_or_create`] writes a default `tierkv.toml` on first
//! use. To change settings, edit the file and reopen the store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tierkv_durability::{ConfigError, DiskConfig};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tierkv.toml";

/// Configuration for a [`TieredStore`](crate::TieredStore)
///
/// # Example
///
/// ```toml
/// disk_path = "data"
/// # Full sync every 5 minutes; 0 disables the background scheduler
/// sync_interval_ms = 300000
/// ttl_cleanup_interval_ms = 1000
///
/// [disk]
/// partition_prefix = "bucket"
/// partition_count = 1024
/// hash_strategy = "xxhash64"
/// durability = "always"
/// # Values stay in data.log; "keys_and_values" keeps them in memory too
/// index_mode = "keys_only"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Directory of the disk store
    pub disk_path: PathBuf,
    /// Interval between background sync passes; 0 disables them
    pub sync_interval_ms: u64,
    /// Interval between memory-tier TTL sweeps; 0 disables them
    pub ttl_cleanup_interval_ms: u64,
    /// Disk store settings (last, so it serializes as a trailing table)
    pub disk: DiskConfig,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            disk_path: PathBuf::from("data"),
            sync_interval_ms: 0,
            ttl_cleanup_interval_ms: 1000,
            disk: DiskConfig::default(),
        }
    }
}

impl TierConfig {
    /// Default config with the disk store at `disk_path`
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        TierConfig {
            disk_path: disk_path.into(),
            ..Default::default()
        }
    }

    /// Set disk store settings
    pub fn with_disk(mut self, disk: DiskConfig) -> Self {
        self.disk = disk;
        self
    }

    /// Set background sync interval (`Duration::ZERO` disables it)
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set TTL sweep interval (`Duration::ZERO` disables it)
    pub fn with_ttl_cleanup_interval(mut self, interval: Duration) -> Self {
        self.ttl_cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Background sync interval, if enabled
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_ms > 0).then(|| Duration::from_millis(self.sync_interval_ms))
    }

    /// TTL sweep interval, if enabled
    pub fn ttl_cleanup_interval(&self) -> Option<Duration> {
        (self.ttl_cleanup_interval_ms > 0)
            .then(|| Duration::from_millis(self.ttl_cleanup_interval_ms))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), TierConfigError> {
        if self.disk_path.as_os_str().is_empty() {
            return Err(TierConfigError::EmptyDiskPath);
        }
        self.disk.validate()?;
        Ok(())
    }

    /// Read and parse config from a file
    pub fn from_file(path: &Path) -> Result<Self, TierConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| TierConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: TierConfig =
            toml::from_str(&content).map_err(|e| TierConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML and write it to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<(), TierConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TierConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| TierConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `<dir>/tierkv.toml`, writing the default first if it is missing
    ///
    /// A relative `disk_path` is resolved against `dir`.
    pub fn load_or_create(dir: &Path) -> Result<Self, TierConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            std::fs::create_dir_all(dir).map_err(|e| TierConfigError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
            Self::default().write_to_file(&path)?;
        }
        let mut config = Self::from_file(&path)?;
        if config.disk_path.is_relative() {
            config.disk_path = dir.join(&config.disk_path);
        }
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TierConfigError {
    /// Disk path is empty
    #[error("disk_path must not be empty")]
    EmptyDiskPath,

    /// Disk settings are invalid
    #[error("Invalid disk config: {0}")]
    Disk(#[from] ConfigError),

    /// Config file could not be read or written
    #[error("Config file '{}': {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this struct
    #[error("Failed to parse config file '{}': {message}", path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}
