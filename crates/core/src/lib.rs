//! Core types and traits for tierkv
//!
//! This crate defines the foundational pieces shared by every layer:
//! - Error: Error type shared by both tiers and the synchronizer
//! - Timestamp: Microsecond timestamps for write times and TTL expiry
//! - Partitioning: HashStrategy and the immutable PartitionTable
//! - Traits: MemoryTier/ReadView and DiskTier/WriteTx

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod partition;
pub mod timestamp;
pub mod traits;

pub use error::{Error, Result};
pub use partition::{
    HashStrategy, PartitionTable, DEFAULT_PARTITION_COUNT, DEFAULT_PARTITION_PREFIX,
};
pub use timestamp::Timestamp;
pub use traits::{BucketKind, DiskTier, MemoryTier, ReadView, WriteTx};
