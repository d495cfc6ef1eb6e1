//! Snapshot synchronizer
//!
//! Copies every live key of the memory tier into the partition the disk
//! tier routes it to, inside one disk write transaction.
//!
//! # Protocol
//!
//! 1. Open the disk write transaction (serializes concurrent syncs)
//! 2. Open a read view on the memory tier
//! 3. Ascend the view from the empty prefix; put each pair into its routed
//!    partition with no TTL
//! 4. Commit only if every put succeeded and the traversal completed
//!
//! The first failing put stops the traversal and rolls the whole pass back,
//! so a pass is applied entirely or not at all.
//!
//! # Consistency
//!
//! A pass replicates one point-in-time view while the memory tier keeps
//! accepting writes. Three anomalies follow and are not prevented:
//!
//! - **Stale overwrite**: a key updated in memory after the view was taken
//!   is written to disk with its older value; the newer value reaches disk
//!   on the next pass.
//! - **Missed insert**: a key inserted after the view was taken is absent
//!   from disk until the next pass.
//! - **Phantom delete**: a key deleted from memory after the view was taken
//!   (or at any time) stays on disk. Passes only add or overwrite.
//!
//! # Operational Guidance
//!
//! A pass costs time proportional to the total key count (roughly 50-200 ms
//! per million records) and the memory tier writes about 3-5% slower while
//! the view is retained. Run full passes in low-traffic windows.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use tierkv_core::{DiskTier, Error, MemoryTier, ReadView, Result, WriteTx};

/// Outcome of a committed sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys put into the disk tier
    pub keys_written: usize,
    /// Distinct partitions that received at least one key
    pub partitions_touched: usize,
    /// Memory-tier version the pass copied
    pub view_version: u64,
    /// Wall time of the pass, including commit
    pub elapsed: Duration,
}

/// Copy the whole memory tier into the disk tier
///
/// Blocks until the pass completes. Only one pass runs per disk store at a
/// time: a second caller waits in `begin_write` for the first to finish.
///
/// # Errors
///
/// - [`Error::ViewUnavailable`] if the memory view cannot be opened or read;
///   nothing is written.
/// - [`Error::PartitionWrite`] naming the partition of the first failed put;
///   the transaction is rolled back.
/// - [`Error::Commit`] if the commit fails; the pass has no effect.
/// - Any error from opening the disk transaction, unchanged.
///
/// See the [module docs](self) for the anomalies a pass does not prevent.
pub fn sync_all<M, D>(memory: &M, disk: &D) -> Result<SyncReport>
where
    M: MemoryTier + ?Sized,
    D: DiskTier + ?Sized,
{
    let start = Instant::now();
    let partitions = disk.partitions();

    let mut tx = disk.begin_write()?;

    let view = match memory.read_view() {
        Ok(view) => view,
        Err(e) => {
            tx.rollback();
            let err = into_view_unavailable(e);
            warn!(target: "tierkv::sync", error = %err, "Sync pass aborted: no memory view");
            return Err(err);
        }
    };
    let view_version = view.version();

    let mut touched = vec![false; partitions.count()];
    let mut keys_written = 0usize;
    let mut failure: Option<Error> = None;

    let traversal = view.ascend(b"", &mut |key, value| {
        let index = partitions.index_of(key);
        let partition = partitions.names()[index].as_str();
        match tx.put(partition, key, value, None) {
            Ok(()) => {
                keys_written += 1;
                touched[index] = true;
                true
            }
            Err(e) => {
                failure = Some(Error::partition_write(partition, e));
                false
            }
        }
    });
    drop(view);

    if let Some(err) = failure {
        tx.rollback();
        warn!(
            target: "tierkv::sync",
            keys_staged = keys_written,
            error = %err,
            "Sync pass rolled back"
        );
        return Err(err);
    }
    if let Err(e) = traversal {
        tx.rollback();
        let err = into_view_unavailable(e);
        warn!(target: "tierkv::sync", error = %err, "Sync pass rolled back: view failed");
        return Err(err);
    }

    if let Err(e) = tx.commit() {
        let err = Error::commit(e);
        warn!(target: "tierkv::sync", keys = keys_written, error = %err, "Sync commit failed");
        return Err(err);
    }

    let report = SyncReport {
        keys_written,
        partitions_touched: touched.iter().filter(|t| **t).count(),
        view_version,
        elapsed: start.elapsed(),
    };
    info!(
        target: "tierkv::sync",
        keys_written = report.keys_written,
        partitions_touched = report.partitions_touched,
        view_version = report.view_version,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Sync pass committed"
    );
    Ok(report)
}

fn into_view_unavailable(e: Error) -> Error {
    match e {
        Error::ViewUnavailable(_) => e,
        other => Error::ViewUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, FaultyDisk};
    use tierkv_core::{BucketKind, PartitionTable};
    use tierkv_durability::{DiskConfig, PartitionedStore};
    use tierkv_storage::MemoryStore;

    fn disk(dir: &std::path::Path) -> PartitionedStore {
        PartitionedStore::open(dir, DiskConfig::for_testing()).unwrap()
    }

    fn memory_with(n: usize) -> MemoryStore {
        let memory = MemoryStore::new();
        for i in 0..n {
            memory
                .set(format!("key{:03}", i), format!("value{}", i), None)
                .unwrap();
        }
        memory
    }

    #[test]
    fn test_sync_copies_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let disk = disk(dir.path());
        let memory = memory_with(100);

        let report = sync_all(&memory, &disk).unwrap();
        assert_eq!(report.keys_written, 100);
        assert_eq!(report.view_version, 100);
        assert!(report.partitions_touched <= 16);
        assert!(report.partitions_touched > 1);

        for i in 0..100 {
            let key = format!("key{:03}", i);
            let partition = disk.partitions().route(key.as_bytes());
            assert_eq!(
                disk.get(partition, key.as_bytes()).unwrap(),
                Some(format!("value{}", i).into_bytes())
            );
        }
        assert_eq!(disk.len(), 100);
    }

    #[test]
    fn test_sync_empty_memory_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let disk = disk(dir.path());
        let before = disk.log_len();

        let report = sync_all(&MemoryStore::new(), &disk).unwrap();
        assert_eq!(report.keys_written, 0);
        assert_eq!(report.partitions_touched, 0);
        assert_eq!(disk.log_len(), before);
    }

    #[test]
    fn test_sync_is_non_subtractive() {
        let dir = tempfile::tempdir().unwrap();
        let disk = disk(dir.path());
        let memory = memory_with(10);
        sync_all(&memory, &disk).unwrap();

        memory.delete(b"key003").unwrap();
        memory.set(b"key004".to_vec(), b"changed".to_vec(), None).unwrap();
        sync_all(&memory, &disk).unwrap();

        assert_eq!(
            disk.get_routed(b"key003").unwrap(),
            Some(b"value3".to_vec())
        );
        assert_eq!(disk.get_routed(b"key004").unwrap(), Some(b"changed".to_vec()));
        assert_eq!(disk.len(), 10);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let disk = disk(dir.path());
        let memory = memory_with(25);

        sync_all(&memory, &disk).unwrap();
        let first: Vec<_> = disk
            .buckets()
            .iter()
            .map(|b| disk.get_all(b).unwrap())
            .collect();
        sync_all(&memory, &disk).unwrap();
        let second: Vec<_> = disk
            .buckets()
            .iter()
            .map(|b| disk.get_all(b).unwrap())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_expired_memory_keys_are_not_synced() {
        let dir = tempfile::tempdir().unwrap();
        let disk = disk(dir.path());
        let memory = MemoryStore::new();
        memory
            .set(b"short".to_vec(), b"v".to_vec(), Some(Duration::from_millis(10)))
            .unwrap();
        memory.set(b"kept".to_vec(), b"v".to_vec(), None).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let report = sync_all(&memory, &disk).unwrap();
        assert_eq!(report.keys_written, 1);
        assert_eq!(disk.get_routed(b"short").unwrap(), None);
        assert_eq!(disk.ttl(disk.partitions().route(b"kept"), b"kept").unwrap(), None);
    }

    #[test]
    fn test_view_unavailable_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let disk = disk(dir.path());
        let memory = memory_with(5);
        memory.close();
        let before = disk.log_len();

        let result = sync_all(&memory, &disk);
        assert!(matches!(result, Err(Error::ViewUnavailable(_))));
        assert_eq!(disk.log_len(), before);
        assert!(disk.is_empty());

        // The writer lock was released
        let tx = disk.begin_write().unwrap();
        tx.rollback();
    }

    #[test]
    fn test_failed_put_rolls_back_everything() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FaultyDisk::new(disk(dir.path()), Fault::PutNumber(7));
        let memory = memory_with(20);

        let result = sync_all(&memory, &disk);
        match result {
            Err(Error::PartitionWrite { partition, .. }) => {
                assert!(disk.inner().partitions().names().contains(&partition));
            }
            other => panic!("expected PartitionWrite, got {:?}", other),
        }
        assert_eq!(disk.puts_attempted(), 7);
        assert!(disk.inner().is_empty());
    }

    #[test]
    fn test_failed_commit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FaultyDisk::new(disk(dir.path()), Fault::Commit);
        let memory = memory_with(5);

        let result = sync_all(&memory, &disk);
        assert!(matches!(result, Err(Error::Commit { .. })));
        assert!(disk.inner().is_empty());
    }

    #[test]
    fn test_every_put_failure_position_is_all_or_nothing() {
        let memory = memory_with(12);
        for j in 1..=12 {
            let dir = tempfile::tempdir().unwrap();
            let disk = FaultyDisk::new(disk(dir.path()), Fault::PutNumber(j));
            assert!(sync_all(&memory, &disk).is_err());
            assert!(disk.inner().is_empty(), "put {} left data behind", j);
        }
    }

    #[test]
    fn test_three_keys_into_default_table() {
        let dir = tempfile::tempdir().unwrap();
        let disk = PartitionedStore::open(dir.path(), DiskConfig::faster()).unwrap();
        assert_eq!(disk.partitions().count(), 1024);

        let memory = MemoryStore::new();
        for i in 0..3 {
            memory
                .set(format!("key{}", i), format!("value{}", i), None)
                .unwrap();
        }

        let report = sync_all(&memory, &disk).unwrap();
        assert_eq!(report.keys_written, 3);

        let table = PartitionTable::default();
        for i in 0..3 {
            let key = format!("key{}", i);
            assert_eq!(
                disk.get(table.route(key.as_bytes()), key.as_bytes()).unwrap(),
                Some(format!("value{}", i).into_bytes())
            );
        }

        let mut buckets = Vec::new();
        disk.iterate_buckets(BucketKind::Tree, "*", &mut |bucket| {
            buckets.push(bucket.to_string());
            true
        })
        .unwrap();
        assert_eq!(buckets.len(), 1024);
        let records: usize = buckets
            .iter()
            .map(|bucket| disk.get_all(bucket).unwrap().len())
            .sum();
        assert_eq!(records, 3);
    }

    #[test]
    fn test_concurrent_syncs_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let disk = std::sync::Arc::new(disk(dir.path()));
        let memory = std::sync::Arc::new(memory_with(50));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let disk = disk.clone();
                let memory = memory.clone();
                std::thread::spawn(move || sync_all(&*memory, &*disk).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().keys_written, 50);
        }
        assert_eq!(disk.len(), 50);
    }
}
