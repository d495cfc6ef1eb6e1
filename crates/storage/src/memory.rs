//! MemoryStore: the in-memory ordered tier
//!
//! This module implements the memory tier using:
//! - `BTreeMap<Vec<u8>, StoredValue>` for ordered key storage with TTL
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for monotonically increasing version numbers
//! - A TTL index for efficient expiry cleanup
//!
//! # Design Notes
//!
//! - **Single namespace**: keys are opaque bytes, no partitioning here
//! - **No version history**: each key stores only its latest value
//! - **Logical TTL expiration**: expired values are filtered at read time and
//!   removed later by the [`TTLCleaner`](crate::TTLCleaner)
//! - **Version allocation before write lock**: keeps the lock hold short

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use tierkv_core::{Error, MemoryTier, Result, Timestamp};

use crate::snapshot::ClonedSnapshotView;
use crate::stored_value::StoredValue;
use crate::ttl::TTLIndex;

/// In-memory ordered key-value store
#[derive(Debug)]
pub struct MemoryStore {
    /// The main data store: ordered map from key to StoredValue (includes TTL)
    data: RwLock<BTreeMap<Vec<u8>, StoredValue>>,
    /// TTL index: expiry_timestamp → keys for efficient cleanup
    ttl_index: RwLock<TTLIndex>,
    /// Global version counter
    version: AtomicU64,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty store
    ///
    /// Initial version is 0 (no writes have occurred).
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            ttl_index: RwLock::new(TTLIndex::new()),
            version: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidOperation("memory store is closed".to_string()));
        }
        Ok(())
    }

    /// Allocate the next version atomically
    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get current global version
    ///
    /// Returns the highest version assigned so far.
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Set `key` to `value`, optionally expiring after `ttl`
    ///
    /// Returns the version assigned to this write.
    pub fn set(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<u64> {
        self.ensure_open()?;
        let key = key.into();
        let version = self.next_version();
        let stored_value = StoredValue::new(value.into(), version, ttl);
        let new_expiry = stored_value.expiry_timestamp();

        let mut data = self.data.write();
        let mut ttl_idx = self.ttl_index.write();

        if let Some(old_expiry) = data.get(&key).and_then(StoredValue::expiry_timestamp) {
            ttl_idx.remove(old_expiry, &key);
        }
        if let Some(expiry) = new_expiry {
            ttl_idx.insert(expiry, key.clone());
        }
        data.insert(key, stored_value);

        Ok(version)
    }

    /// Get the live value for `key`
    ///
    /// Returns None if the key doesn't exist or is expired.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let data = self.data.read();
        match data.get(key) {
            Some(sv) if !sv.is_expired() => Ok(Some(sv.value().to_vec())),
            _ => Ok(None),
        }
    }

    /// Check whether a live value exists for `key`
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let data = self.data.read();
        Ok(data.get(key).map(|sv| !sv.is_expired()).unwrap_or(false))
    }

    /// Delete `key`
    ///
    /// Returns the deleted value if it existed and was live.
    pub fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut data = self.data.write();
        let mut ttl_idx = self.ttl_index.write();

        let removed = data.remove(key);
        if let Some(expiry) = removed.as_ref().and_then(StoredValue::expiry_timestamp) {
            ttl_idx.remove(expiry, key);
        }

        Ok(removed.filter(|sv| !sv.is_expired()).map(StoredValue::into_value))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Timestamp::now();
        self.data
            .read()
            .values()
            .filter(|sv| !sv.is_expired_at(now))
            .count()
    }

    /// Check if the store has no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find all keys that have expired before the current time
    ///
    /// Uses the TTL index: O(expired count) instead of O(total data).
    pub fn find_expired_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        let now = Timestamp::now();
        Ok(self.ttl_index.read().find_expired(now))
    }

    /// Remove `key` only if its current value is expired
    ///
    /// A key that was rewritten after it was found expired is kept.
    /// Returns true if an entry was removed.
    pub fn remove_if_expired(&self, key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let now = Timestamp::now();
        let mut data = self.data.write();
        let mut ttl_idx = self.ttl_index.write();

        let expiry = match data.get(key) {
            Some(sv) if sv.is_expired_at(now) => sv.expiry_timestamp(),
            _ => return Ok(false),
        };
        data.remove(key);
        if let Some(expiry) = expiry {
            ttl_idx.remove(expiry, key);
        }
        Ok(true)
    }

    /// Create a snapshot of the current state
    ///
    /// Clones the ordered map under a read lock. O(n) in the number of keys;
    /// writers are blocked only while the clone is taken.
    pub fn create_snapshot(&self) -> ClonedSnapshotView {
        // Read the version under the lock so the clone holds every write up to it
        let data = self.data.read();
        let version = self.current_version();
        ClonedSnapshotView::new(version, data.clone())
    }

    /// Close the store
    ///
    /// Subsequent reads, writes and view requests fail. Data is dropped with
    /// the store.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(version = self.current_version(), "Memory store closed");
        }
    }

    /// Check if the store has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTier for MemoryStore {
    type View = ClonedSnapshotView;

    fn read_view(&self) -> Result<ClonedSnapshotView> {
        if self.is_closed() {
            return Err(Error::ViewUnavailable("memory store is closed".to_string()));
        }
        Ok(self.create_snapshot())
    }
}
