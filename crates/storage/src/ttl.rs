//! TTL (Time-To-Live) index for efficient expiration cleanup
//!
//! Maps expiry_timestamp → Set<key> using a BTreeMap so that all keys
//! expired before a given time are found in O(expired count) instead of
//! O(total data).

use std::collections::{BTreeMap, HashSet};

use tierkv_core::Timestamp;

/// TTL index: expiry_timestamp → keys
#[derive(Debug, Default)]
pub struct TTLIndex {
    index: BTreeMap<Timestamp, HashSet<Vec<u8>>>,
}

impl TTLIndex {
    /// Create a new empty TTLIndex
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
        }
    }

    /// Add key to TTL index with given expiry timestamp
    pub fn insert(&mut self, expiry_timestamp: Timestamp, key: Vec<u8>) {
        self.index.entry(expiry_timestamp).or_default().insert(key);
    }

    /// Remove key from TTL index at given expiry timestamp
    ///
    /// If the set becomes empty, removes the timestamp entry entirely.
    pub fn remove(&mut self, expiry_timestamp: Timestamp, key: &[u8]) {
        if let Some(keys) = self.index.get_mut(&expiry_timestamp) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&expiry_timestamp);
            }
        }
    }

    /// Find all keys whose expiry timestamp is at or before `now`
    pub fn find_expired(&self, now: Timestamp) -> Vec<Vec<u8>> {
        self.index
            .range(..=now)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get the total number of keys in the index
    pub fn len(&self) -> usize {
        self.index.values().map(|keys| keys.len()).sum()
    }

    /// Get the number of unique expiry timestamps
    pub fn timestamp_count(&self) -> usize {
        self.index.len()
    }
}
