//! Memory-tier value wrapper with TTL support
//!
//! `StoredValue` keeps the raw value together with the version and write
//! time assigned by the store, plus an optional time-to-live.

use std::time::Duration;

use tierkv_core::Timestamp;

/// A stored value with optional TTL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    value: Vec<u8>,
    version: u64,
    timestamp: Timestamp,
    ttl: Option<Duration>,
}

impl StoredValue {
    /// Create a stored value written now
    pub fn new(value: Vec<u8>, version: u64, ttl: Option<Duration>) -> Self {
        Self::with_timestamp(value, version, Timestamp::now(), ttl)
    }

    /// Create a stored value with explicit write time
    pub fn with_timestamp(
        value: Vec<u8>,
        version: u64,
        timestamp: Timestamp,
        ttl: Option<Duration>,
    ) -> Self {
        StoredValue {
            value,
            version,
            timestamp,
            ttl,
        }
    }

    /// Get the value bytes
    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consume and return the value bytes
    #[inline]
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Get the version assigned at write time
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get the write timestamp
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Get the TTL
    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Calculate the expiry timestamp
    ///
    /// Returns `Some(timestamp)` when the value will expire, or `None` if no TTL.
    pub fn expiry_timestamp(&self) -> Option<Timestamp> {
        self.ttl.map(|ttl| self.timestamp.saturating_add(ttl))
    }

    /// Check if this value has expired as of `now`
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        match self.expiry_timestamp() {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }

    /// Check if this value has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Timestamp::now())
    }
}
