//! Fault injection for sync tests
//!
//! [`FaultyDisk`] wraps a [`PartitionedStore`] and fails one chosen put or
//! the commit, so tests can check that a failed pass leaves the disk tier
//! untouched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tierkv_core::{BucketKind, DiskTier, Error, PartitionTable, Result, WriteTx};
use tierkv_durability::{DiskWriteTx, PartitionedStore};

/// Which operation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The n-th put of each transaction fails (1-based)
    PutNumber(usize),
    /// Every commit fails before anything is written
    Commit,
    /// Nothing fails
    None,
}

/// Disk tier that fails on demand
pub struct FaultyDisk {
    inner: PartitionedStore,
    fault: Fault,
    puts_attempted: AtomicUsize,
}

impl FaultyDisk {
    /// Wrap `inner`, failing as described by `fault`
    pub fn new(inner: PartitionedStore, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            puts_attempted: AtomicUsize::new(0),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &PartitionedStore {
        &self.inner
    }

    /// Puts attempted by the last transaction, including the failing one
    pub fn puts_attempted(&self) -> usize {
        self.puts_attempted.load(Ordering::SeqCst)
    }
}

impl DiskTier for FaultyDisk {
    type Tx<'a> = FaultyTx<'a>;

    fn bucket_exists(&self, kind: BucketKind, name: &str) -> Result<bool> {
        self.inner.bucket_exists(kind, name)
    }

    fn create_bucket(&self, kind: BucketKind, name: &str) -> Result<()> {
        self.inner.create_bucket(kind, name)
    }

    fn begin_write(&self) -> Result<FaultyTx<'_>> {
        self.puts_attempted.store(0, Ordering::SeqCst);
        Ok(FaultyTx {
            inner: self.inner.begin_write()?,
            disk: self,
        })
    }

    fn partitions(&self) -> &PartitionTable {
        self.inner.partitions()
    }
}

/// Transaction of a [`FaultyDisk`]
pub struct FaultyTx<'a> {
    inner: DiskWriteTx<'a>,
    disk: &'a FaultyDisk,
}

impl WriteTx for FaultyTx<'_> {
    fn put(
        &mut self,
        bucket: &str,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let attempt = self.disk.puts_attempted.fetch_add(1, Ordering::SeqCst) + 1;
        if self.disk.fault == Fault::PutNumber(attempt) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure on put {}", attempt),
            )));
        }
        self.inner.put(bucket, key, value, ttl)
    }

    fn commit(self) -> Result<()> {
        if self.disk.fault == Fault::Commit {
            self.inner.rollback();
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected commit failure",
            )));
        }
        self.inner.commit()
    }

    fn rollback(self) {
        self.inner.rollback()
    }
}
