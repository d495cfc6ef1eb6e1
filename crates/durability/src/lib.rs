//! Disk tier for tierkv
//!
//! This crate handles everything that touches disk:
//!
//! - PartitionedStore: bucketed key/value store with serialized write
//!   transactions and per-key TTL
//! - MANIFEST: pins the partition table a store was created with
//! - Data log: one CRC-protected record per committed transaction, replayed
//!   on open, compacted by merge
//! - Durability modes: Never, Always, Standard (default)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod format;
pub mod log;
pub mod store;

pub use config::{ConfigError, DiskConfig, DurabilityMode, IndexMode};
pub use format::{LogOp, LogRecord, Manifest, ManifestError, RecordError, ValueSpan};
pub use log::{DataLog, LogCounters, LogReader};
pub use store::{DiskWriteTx, MergeStats, PartitionedStore, DATA_LOG_FILE, MANIFEST_FILE};
