//! Core traits for the memory and disk tiers
//!
//! The synchronizer is written against these traits only, so either tier
//! can be swapped (or wrapped, e.g. for fault injection) without touching
//! the sync protocol.

use std::time::Duration;

use crate::error::Result;
use crate::partition::PartitionTable;

/// Ordered read-only view of the memory tier
///
/// A view is opened once per sync pass and released when dropped.
pub trait ReadView {
    /// Visit every live `(key, value)` whose key starts with `prefix`, in
    /// ascending key order
    ///
    /// Iteration stops early when `visit` returns `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view can no longer be read.
    fn ascend(&self, prefix: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<()>;

    /// Version of the memory tier this view reflects
    fn version(&self) -> u64;
}

/// Fast in-memory ordered store (single namespace)
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait MemoryTier: Send + Sync {
    /// View type returned by [`read_view`](Self::read_view)
    type View: ReadView;

    /// Open an isolated read view
    ///
    /// # Errors
    ///
    /// Returns [`Error::ViewUnavailable`](crate::Error::ViewUnavailable) if
    /// the view cannot be established.
    fn read_view(&self) -> Result<Self::View>;
}

/// Data structure kind of a disk-tier bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Ordered key/value map
    Tree,
}

/// Write transaction on the disk tier
///
/// Puts are buffered and become visible only on [`commit`](Self::commit).
/// Dropping an uncommitted transaction rolls it back.
pub trait WriteTx {
    /// Stage a put of `key` into `bucket`
    ///
    /// `ttl = None` means the record never expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket does not exist or the write cannot be
    /// staged.
    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8], ttl: Option<Duration>)
        -> Result<()>;

    /// Atomically apply every staged write
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable; nothing is
    /// applied in that case.
    fn commit(self) -> Result<()>
    where
        Self: Sized;

    /// Discard every staged write
    fn rollback(self)
    where
        Self: Sized;
}

/// Partitioned, disk-resident store
///
/// The partition table is fixed when the store is opened.
pub trait DiskTier: Send + Sync {
    /// Transaction type returned by [`begin_write`](Self::begin_write)
    type Tx<'a>: WriteTx
    where
        Self: 'a;

    /// Check whether a bucket exists
    fn bucket_exists(&self, kind: BucketKind, name: &str) -> Result<bool>;

    /// Create a bucket
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be created.
    fn create_bucket(&self, kind: BucketKind, name: &str) -> Result<()>;

    /// Open a write transaction
    ///
    /// Write transactions on one store are serialized: this blocks while
    /// another write transaction is open.
    fn begin_write(&self) -> Result<Self::Tx<'_>>;

    /// Partition table keys are routed with
    fn partitions(&self) -> &PartitionTable;
}
