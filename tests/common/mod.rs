//! Shared test utilities for the end-to-end suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tierkv::{DiskConfig, MemoryStore, PartitionedStore, TierConfig, TieredStore};

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness (filter with `RUST_LOG`)
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Tiered store config with a small partition table under `dir`
pub fn test_config(dir: &Path) -> TierConfig {
    TierConfig::new(dir.join("disk")).with_disk(DiskConfig::for_testing())
}

/// Open a tiered store with no background workers
pub fn open_quiet(dir: &TempDir) -> TieredStore {
    init_tracing();
    TieredStore::open(test_config(dir.path()).with_ttl_cleanup_interval(Duration::ZERO)).unwrap()
}

/// Open a bare disk store with the test config
pub fn open_disk(dir: &Path) -> PartitionedStore {
    init_tracing();
    PartitionedStore::open(dir, DiskConfig::for_testing()).unwrap()
}

/// Memory store holding `key{i}` -> `value{i}` for `i` in `0..n`
pub fn populated_memory(n: usize) -> MemoryStore {
    let memory = MemoryStore::new();
    for i in 0..n {
        memory
            .set(format!("key{}", i), format!("value{}", i), None)
            .unwrap();
    }
    memory
}

/// Poll `done` until it holds or five seconds pass
pub fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}
