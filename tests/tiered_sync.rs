//! End-to-end sync scenarios through the public `tierkv` API

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use parking_lot::Mutex;
use tempfile::TempDir;
use tierkv::{
    sync_all, BucketKind, DiskConfig, DiskTier, Error, HashStrategy, MemoryStore,
    PartitionTable, PartitionedStore, TieredStore,
};

#[test]
fn test_three_keys_default_partitioning() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let disk = PartitionedStore::open(dir.path(), DiskConfig::faster()).unwrap();
    let memory = populated_memory(3);

    sync_all(&memory, &disk).unwrap();

    let table = PartitionTable::new("bucket", 1024, HashStrategy::XxHash64);
    for i in 0..3 {
        let key = format!("key{}", i);
        assert_eq!(
            disk.get(table.route(key.as_bytes()), key.as_bytes()).unwrap(),
            Some(format!("value{}", i).into_bytes())
        );
    }

    let mut names = Vec::new();
    disk.iterate_buckets(BucketKind::Tree, "*", &mut |name| {
        names.push(name.to_string());
        true
    })
    .unwrap();
    let total: usize = names.iter().map(|n| disk.bucket_len(n).unwrap()).sum();
    assert_eq!(total, 3);
}

#[test]
fn test_crc32_store_routes_with_crc32() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let disk = PartitionedStore::open(
        dir.path(),
        DiskConfig::for_testing().with_hash_strategy(HashStrategy::Crc32),
    )
    .unwrap();
    let memory = populated_memory(50);
    sync_all(&memory, &disk).unwrap();

    for i in 0..50 {
        let key = format!("key{}", i);
        let index = HashStrategy::Crc32.partition_index(key.as_bytes(), 16);
        let bucket = format!("bucket_{}", index);
        assert!(disk.get(&bucket, key.as_bytes()).unwrap().is_some());
    }
}

#[test]
fn test_sync_while_writers_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_quiet(&dir));
    for i in 0..100 {
        store
            .memory()
            .set(format!("seed{}", i), "v", None)
            .unwrap();
    }

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..500 {
                store
                    .memory()
                    .set(format!("live{}", i), format!("{}", i), None)
                    .unwrap();
            }
        })
    };
    let reports: Vec<_> = (0..5).map(|_| store.sync_all().unwrap()).collect();
    writer.join().unwrap();

    // Every pass copied at least the seed keys, and never more than existed
    for report in &reports {
        assert!(report.keys_written >= 100);
        assert!(report.keys_written <= 600);
    }
    // Views are taken in order
    assert!(reports.windows(2).all(|w| w[0].view_version <= w[1].view_version));

    // A final pass catches up with every write
    store.sync_all().unwrap();
    assert_eq!(store.disk().len(), 600);
}

#[test]
fn test_deleted_keys_stay_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = open_quiet(&dir);
    store.memory().set("doomed", "v", None).unwrap();
    store.sync_all().unwrap();

    store.memory().delete(b"doomed").unwrap();
    store.sync_all().unwrap();
    assert_eq!(store.disk().get_routed(b"doomed").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_memory_ttl_is_not_carried_to_disk() {
    let dir = TempDir::new().unwrap();
    let store = open_quiet(&dir);
    store
        .memory()
        .set("session", "token", Some(Duration::from_secs(3600)))
        .unwrap();
    store.sync_all().unwrap();

    let bucket = store.disk().partitions().route(b"session").to_string();
    assert_eq!(store.disk().ttl(&bucket, b"session").unwrap(), None);
}

#[test]
fn test_view_failure_reported() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let disk = open_disk(dir.path());
    let memory = MemoryStore::new();
    memory.close();
    assert!(matches!(
        sync_all(&memory, &disk),
        Err(Error::ViewUnavailable(_))
    ));
}

#[test]
fn test_passes_are_serialized_per_disk_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_quiet(&dir));
    for i in 0..200 {
        store.memory().set(format!("k{}", i), "v", None).unwrap();
    }

    let written = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let written = Arc::clone(&written);
            thread::spawn(move || {
                let report = store.sync_all().unwrap();
                written.lock().push(report.keys_written);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*written.lock(), vec![200; 4]);
    assert_eq!(store.disk().len(), 200);
}

#[test]
fn test_background_scheduler_and_ttl_cleaner() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = TieredStore::open(
        test_config(dir.path())
            .with_sync_interval(Duration::from_millis(30))
            .with_ttl_cleanup_interval(Duration::from_millis(30)),
    )
    .unwrap();

    store
        .memory()
        .set("brief", "v", Some(Duration::from_millis(10)))
        .unwrap();
    store.memory().set("durable", "v", None).unwrap();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(store.memory().len(), 1);
    // The cleaner reclaims the expired entry
    assert!(wait_until(|| store.memory().find_expired_keys().unwrap().is_empty()));
    assert!(wait_until(|| store.disk().get_routed(b"durable").unwrap().is_some()));
    assert!(store.scheduled_passes().unwrap() >= 1);
    store.close().unwrap();
}
