//! Memory tier for tierkv
//!
//! This crate implements the fast in-memory ordered store with:
//! - MemoryStore: BTreeMap-based storage with RwLock
//! - Version management with AtomicU64
//! - TTL index for expiration
//! - TTL cleaner background task
//! - ClonedSnapshotView: the read view handed to sync passes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleaner;
pub mod memory;
pub mod snapshot;
pub mod stored_value;
pub mod ttl;

pub use cleaner::TTLCleaner;
pub use memory::MemoryStore;
pub use snapshot::ClonedSnapshotView;
pub use stored_value::StoredValue;
pub use ttl::TTLIndex;
