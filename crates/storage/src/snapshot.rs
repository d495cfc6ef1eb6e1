//! ClonedSnapshotView: read view of the memory tier via deep clone
//!
//! The view is taken under a short read lock and then owns its own copy of
//! the ordered map, so a sync traversal never holds a lock on the live
//! store while it writes to the disk tier.
//!
//! # Design Notes
//!
//! - **Deep clone**: O(n) at creation, retained for the life of the view
//! - **Immutable**: Once created, the view never changes
//! - **Thread-safe**: Data is Arc-wrapped; clones of the view are cheap
//! - **Version-bounded**: Only returns data visible at the view version

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use tierkv_core::{ReadView, Result, Timestamp};

use crate::stored_value::StoredValue;

/// A read view that owns a clone of the memory-tier map
#[derive(Debug, Clone)]
pub struct ClonedSnapshotView {
    version: u64,
    data: Arc<BTreeMap<Vec<u8>, StoredValue>>,
}

impl ClonedSnapshotView {
    /// Create a view from cloned data
    ///
    /// Typically called by `MemoryStore::create_snapshot()`, not directly.
    pub fn new(version: u64, data: BTreeMap<Vec<u8>, StoredValue>) -> Self {
        Self {
            version,
            data: Arc::new(data),
        }
    }

    #[inline]
    fn visible(&self, sv: &StoredValue, now: Timestamp) -> bool {
        sv.version() <= self.version && !sv.is_expired_at(now)
    }

    /// Get a value as of the view
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let now = Timestamp::now();
        self.data
            .get(key)
            .filter(|sv| self.visible(sv, now))
            .map(StoredValue::value)
    }

    /// Number of live entries in the view
    pub fn len(&self) -> usize {
        let now = Timestamp::now();
        self.data.values().filter(|sv| self.visible(sv, now)).count()
    }

    /// Check if the view has no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReadView for ClonedSnapshotView {
    fn ascend(&self, prefix: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        // One clock reading per traversal so expiry is judged consistently
        let now = Timestamp::now();
        let range = self
            .data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix));

        for (key, sv) in range {
            if !self.visible(sv, now) {
                continue;
            }
            if !visit(key, sv.value()) {
                break;
            }
        }
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version
    }
}
