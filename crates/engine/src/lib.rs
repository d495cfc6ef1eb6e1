//! Sync engine for tierkv
//!
//! This crate ties the two tiers together:
//! - sync_all: copies the memory tier into the partitioned disk tier in one
//!   atomic disk transaction
//! - SyncScheduler: runs sync passes on a background thread
//! - TieredStore: opens both tiers and owns the background workers
//! - TierConfig: settings, loadable from `tierkv.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod scheduler;
pub mod sync;
pub mod testing;
pub mod tiered;

pub use config::{TierConfig, TierConfigError, CONFIG_FILE_NAME};
pub use scheduler::SyncScheduler;
pub use sync::{sync_all, SyncReport};
pub use tiered::TieredStore;
