//! Disk store configuration
//!
//! Controls the partition table a new store is created with and when the
//! data log is fsynced.

use serde::{Deserialize, Serialize};

use tierkv_core::{
    HashStrategy, PartitionTable, DEFAULT_PARTITION_COUNT, DEFAULT_PARTITION_PREFIX,
};

/// When the data log is fsynced
///
/// # Modes
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Never | Only on explicit `sync()` | Whatever the OS has not flushed |
/// | Always | Every commit | Zero |
/// | Standard | Periodic | Up to interval/batch |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// Leave flushing to the OS; fsync only on explicit `sync()` and merge
    Never,

    /// fsync after every commit (slow, maximum durability)
    Always,

    /// fsync every N commits OR every T milliseconds (the default)
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum commits between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode requires immediate fsync on every commit
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Never => "Never (OS flush only)",
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (balanced speed/safety)",
        }
    }

    /// Standard mode with recommended defaults
    ///
    /// Returns `Standard { interval_ms: 100, batch_size: 1000 }`.
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::standard_default()
    }
}

/// What the in-memory index holds for each key
///
/// Either way every key and its expiry stay in memory. The mode decides
/// whether values are read from the data log or served from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Keys in memory, values read from the data log on demand (the default)
    #[default]
    KeysOnly,
    /// Keys and values in memory; reads never touch disk
    KeysAndValues,
}

/// Disk store configuration
///
/// `partition_prefix`, `partition_count` and `hash_strategy` are recorded in
/// the MANIFEST when a store is created and must match on every reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Partition name prefix (names are `<prefix>_<index>`)
    pub partition_prefix: String,
    /// Number of partitions; 0 means [`DEFAULT_PARTITION_COUNT`]
    pub partition_count: usize,
    /// Routing hash
    pub hash_strategy: HashStrategy,
    /// fsync policy for the data log
    pub durability: DurabilityMode,
    /// Whether values are kept in memory; may change between opens
    pub index_mode: IndexMode,
}

impl Default for DiskConfig {
    fn default() -> Self {
        DiskConfig {
            partition_prefix: DEFAULT_PARTITION_PREFIX.to_string(),
            partition_count: DEFAULT_PARTITION_COUNT,
            hash_strategy: HashStrategy::default(),
            durability: DurabilityMode::default(),
            index_mode: IndexMode::default(),
        }
    }
}

impl DiskConfig {
    /// Every commit is fsynced before returning
    pub fn strict() -> Self {
        DiskConfig {
            durability: DurabilityMode::Always,
            ..Default::default()
        }
    }

    /// Never fsync on commit and keep values in memory
    ///
    /// A crash may lose what the OS had not flushed.
    pub fn faster() -> Self {
        DiskConfig {
            durability: DurabilityMode::Never,
            index_mode: IndexMode::KeysAndValues,
            ..Default::default()
        }
    }

    /// Small partition table and no fsync, for tests
    pub fn for_testing() -> Self {
        DiskConfig {
            partition_count: 16,
            durability: DurabilityMode::Never,
            ..Default::default()
        }
    }

    /// Set partition name prefix
    pub fn with_partition_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.partition_prefix = prefix.into();
        self
    }

    /// Set partition count
    pub fn with_partition_count(mut self, count: usize) -> Self {
        self.partition_count = count;
        self
    }

    /// Set routing hash
    pub fn with_hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.hash_strategy = strategy;
        self
    }

    /// Set durability mode
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set index mode
    pub fn with_index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Partition count after replacing an invalid (zero) value
    pub fn effective_partition_count(&self) -> usize {
        if self.partition_count == 0 {
            DEFAULT_PARTITION_COUNT
        } else {
            self.partition_count
        }
    }

    /// Build the partition table described by this config
    pub fn partition_table(&self) -> PartitionTable {
        PartitionTable::new(
            self.partition_prefix.clone(),
            self.effective_partition_count(),
            self.hash_strategy,
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.effective_partition_count() > u32::MAX as usize {
            return Err(ConfigError::TooManyPartitions(self.partition_count));
        }
        // Longest name must fit the u16 bucket-name field of the log format
        let longest = PartitionTable::partition_name(
            &self.partition_prefix,
            self.effective_partition_count() - 1,
        );
        if longest.len() > u16::MAX as usize {
            return Err(ConfigError::PrefixTooLong(self.partition_prefix.len()));
        }
        if let DurabilityMode::Standard { batch_size, .. } = self.durability {
            if batch_size == 0 {
                return Err(ConfigError::ZeroBatchSize);
            }
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Partition prefix is empty
    #[error("Partition prefix must not be empty")]
    EmptyPrefix,

    /// Partition names would not fit the log format
    #[error("Partition prefix too long: {0} bytes")]
    PrefixTooLong(usize),

    /// Partition count does not fit in the MANIFEST
    #[error("Too many partitions: {0}")]
    TooManyPartitions(usize),

    /// Standard durability with a zero batch size
    #[error("Standard durability batch size must be at least 1")]
    ZeroBatchSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiskConfig::default();
        assert_eq!(config.partition_prefix, "bucket");
        assert_eq!(config.partition_count, 1024);
        assert_eq!(config.hash_strategy, HashStrategy::XxHash64);
        assert!(matches!(config.durability, DurabilityMode::Standard { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert!(DiskConfig::strict().durability.requires_immediate_fsync());
        assert_eq!(DiskConfig::faster().durability, DurabilityMode::Never);
        assert_eq!(DiskConfig::faster().index_mode, IndexMode::KeysAndValues);
        assert_eq!(DiskConfig::default().index_mode, IndexMode::KeysOnly);
        assert_eq!(DiskConfig::for_testing().partition_count, 16);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DiskConfig::default()
            .with_partition_prefix("shard")
            .with_partition_count(8)
            .with_hash_strategy(HashStrategy::Crc32)
            .with_durability(DurabilityMode::Always);

        let table = config.partition_table();
        assert_eq!(table.count(), 8);
        assert_eq!(table.name(0), Some("shard_0"));
        assert_eq!(table.strategy(), HashStrategy::Crc32);
    }

    #[test]
    fn test_zero_partition_count_defaults() {
        let config = DiskConfig::default().with_partition_count(0);
        assert_eq!(config.effective_partition_count(), 1024);
        assert_eq!(config.partition_table().count(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_eq!(
            DiskConfig::default().with_partition_prefix("").validate(),
            Err(ConfigError::EmptyPrefix)
        );
        let config = DiskConfig::default().with_durability(DurabilityMode::Standard {
            interval_ms: 10,
            batch_size: 0,
        });
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: DiskConfig =
            serde_json::from_str(r#"{"partition_count": 64, "hash_strategy": "crc32"}"#).unwrap();
        assert_eq!(config.partition_count, 64);
        assert_eq!(config.hash_strategy, HashStrategy::Crc32);
        assert_eq!(config.partition_prefix, "bucket");

        let mode: DurabilityMode = serde_json::from_str(r#""always""#).unwrap();
        assert_eq!(mode, DurabilityMode::Always);

        let config: DiskConfig =
            serde_json::from_str(r#"{"index_mode": "keys_and_values"}"#).unwrap();
        assert_eq!(config.index_mode, IndexMode::KeysAndValues);
    }
}
