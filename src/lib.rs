//! tierkv - Tiered key/value storage with snapshot sync
//!
//! tierkv keeps a fast in-memory ordered store in front of a partitioned
//! disk store and periodically copies the whole memory tier to disk.
//!
//! # Quick Start
//!
//! ```ignore
//! use tierkv::{TierConfig, TieredStore};
//!
//! let store = TieredStore::open(TierConfig::new("/var/lib/app/kv"))?;
//! store.memory().set("user:123", "Alice", None)?;
//!
//! // Copy every live key into its disk partition
//! let report = store.sync_all()?;
//! println!("{} keys in {:?}", report.keys_written, report.elapsed);
//! ```
//!
//! # Architecture
//!
//! - `tierkv-core`: errors, timestamps, partition routing, tier traits
//! - `tierkv-storage`: the memory tier ([`MemoryStore`])
//! - `tierkv-durability`: the disk tier ([`PartitionedStore`])
//! - `tierkv-engine`: [`sync_all`], [`SyncScheduler`] and [`TieredStore`]
//!
//! [`sync_all`] is generic over the [`MemoryTier`] and [`DiskTier`] traits,
//! so either tier can be replaced.

pub use tierkv_core::{
    BucketKind, DiskTier, Error, HashStrategy, MemoryTier, PartitionTable, ReadView, Result,
    Timestamp, WriteTx, DEFAULT_PARTITION_COUNT, DEFAULT_PARTITION_PREFIX,
};
pub use tierkv_durability::{
    DiskConfig, DiskWriteTx, DurabilityMode, IndexMode, MergeStats, PartitionedStore,
};
pub use tierkv_engine::{
    sync_all, SyncReport, SyncScheduler, TierConfig, TierConfigError, TieredStore,
};
pub use tierkv_storage::{ClonedSnapshotView, MemoryStore, TTLCleaner};
