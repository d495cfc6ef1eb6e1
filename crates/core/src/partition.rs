//! Key routing for the partitioned disk tier
//!
//! A key is routed to a partition by hashing its raw bytes, reducing the
//! digest modulo the partition count, and indexing into a name table
//! generated once as `<prefix>_0 .. <prefix>_{N-1}`.
//!
//! # Fixed cardinality
//!
//! The partition count and hash strategy are baked into a dataset when its
//! disk store is created. There is no resharding: changing either after
//! data exists makes previously-written keys unreachable, so
//! `PartitionTable` exposes no way to mutate them. The disk store persists
//! both in its MANIFEST and refuses to open with different values.
//!
//! # Sizing
//!
//! Partitions spread write concurrency, not data volume. A reasonable
//! starting point is `(peak concurrent connections * 2) / CPU cores`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Partition count used when a caller supplies an invalid (zero) count
pub const DEFAULT_PARTITION_COUNT: usize = 1024;

/// Default partition name prefix
pub const DEFAULT_PARTITION_PREFIX: &str = "bucket";

/// Hash function used to route keys to partitions
///
/// A dataset must use exactly one strategy for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategy {
    /// IEEE CRC-32 checksum of the key bytes
    Crc32,
    /// XXH64 (seed 0) of the key bytes
    #[default]
    XxHash64,
}

impl HashStrategy {
    /// Hash raw key bytes
    ///
    /// The CRC-32 digest is widened to `u64` so the modulus in
    /// [`partition_index`](Self::partition_index) is always computed on an
    /// unsigned 64-bit value, whatever the platform's pointer width.
    #[inline]
    pub fn hash(&self, key: &[u8]) -> u64 {
        match self {
            HashStrategy::Crc32 => u64::from(crc32fast::hash(key)),
            HashStrategy::XxHash64 => xxhash_rust::xxh64::xxh64(key, 0),
        }
    }

    /// Map a key to a partition index in `[0, count)`
    ///
    /// A zero `count` is treated as [`DEFAULT_PARTITION_COUNT`].
    #[inline]
    pub fn partition_index(&self, key: &[u8], count: usize) -> usize {
        let count = normalize_count(count) as u64;
        (self.hash(key) % count) as usize
    }

    /// Stable one-byte code written to the MANIFEST
    pub fn code(&self) -> u8 {
        match self {
            HashStrategy::Crc32 => 1,
            HashStrategy::XxHash64 => 2,
        }
    }

    /// Parse a MANIFEST strategy code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(HashStrategy::Crc32),
            2 => Some(HashStrategy::XxHash64),
            _ => None,
        }
    }

    /// Stable strategy name
    pub fn name(&self) -> &'static str {
        match self {
            HashStrategy::Crc32 => "crc32",
            HashStrategy::XxHash64 => "xxhash64",
        }
    }
}

impl fmt::Display for HashStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crc32" => Ok(HashStrategy::Crc32),
            "xxhash64" => Ok(HashStrategy::XxHash64),
            other => Err(format!("unknown hash strategy: {}", other)),
        }
    }
}

#[inline]
fn normalize_count(count: usize) -> usize {
    if count == 0 {
        DEFAULT_PARTITION_COUNT
    } else {
        count
    }
}

/// Immutable partition name table plus the routing strategy
///
/// Built once when a disk store is opened and held by its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    prefix: String,
    names: Vec<String>,
    strategy: HashStrategy,
}

impl PartitionTable {
    /// Build the table `<prefix>_0 .. <prefix>_{count-1}`
    ///
    /// A zero `count` is replaced with [`DEFAULT_PARTITION_COUNT`].
    pub fn new(prefix: impl Into<String>, count: usize, strategy: HashStrategy) -> Self {
        let prefix = prefix.into();
        let count = normalize_count(count);
        let names = (0..count)
            .map(|index| Self::partition_name(&prefix, index))
            .collect();
        Self {
            prefix,
            names,
            strategy,
        }
    }

    /// Name of partition `index` under `prefix`
    pub fn partition_name(prefix: &str, index: usize) -> String {
        format!("{}_{}", prefix, index)
    }

    /// Number of partitions
    #[inline]
    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// Partition name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Routing strategy
    #[inline]
    pub fn strategy(&self) -> HashStrategy {
        self.strategy
    }

    /// All partition names in index order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name of the partition at `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Partition index for `key`
    #[inline]
    pub fn index_of(&self, key: &[u8]) -> usize {
        self.strategy.partition_index(key, self.names.len())
    }

    /// Partition name for `key`
    #[inline]
    pub fn route(&self, key: &[u8]) -> &str {
        &self.names[self.index_of(key)]
    }
}

impl Default for PartitionTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_PARTITION_PREFIX,
            DEFAULT_PARTITION_COUNT,
            HashStrategy::default(),
        )
    }
}
