//! Periodic sync background task
//!
//! SyncScheduler runs [`sync_all`] on a background thread at a fixed
//! interval. A failed pass is logged and counted; the next tick runs a full
//! pass again. There is no other retry.
//!
//! # Design Notes
//!
//! - Graceful shutdown via atomic flag, observed within 100ms
//! - Passes never overlap: the thread runs them one after another, and
//!   manual `sync_all` calls queue on the disk store's writer lock

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use tierkv_core::{DiskTier, MemoryTier};

use crate::sync::{sync_all, SyncReport};

/// Pass counters shared with the background thread
#[derive(Debug, Default)]
struct SchedulerStats {
    passes: AtomicU64,
    failures: AtomicU64,
}

/// Background sync task
///
/// # Example
///
/// ```ignore
/// let scheduler = SyncScheduler::new(memory, disk, Duration::from_secs(300));
/// let handle = scheduler.start();
///
/// // ... serve traffic ...
///
/// scheduler.shutdown();
/// handle.join().unwrap();
/// ```
pub struct SyncScheduler<M, D> {
    memory: Arc<M>,
    disk: Arc<D>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
}

impl<M, D> SyncScheduler<M, D>
where
    M: MemoryTier + 'static,
    D: DiskTier + 'static,
{
    /// Create a scheduler running a pass every `interval`
    pub fn new(memory: Arc<M>, disk: Arc<D>, interval: Duration) -> Self {
        Self {
            memory,
            disk,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Run one pass, logging and counting a failure instead of returning it
    fn run_once(memory: &M, disk: &D, stats: &SchedulerStats) -> Option<SyncReport> {
        match sync_all(memory, disk) {
            Ok(report) => {
                stats.passes.fetch_add(1, Ordering::Relaxed);
                Some(report)
            }
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(target: "tierkv::sync", error = %e, "Scheduled sync pass failed");
                None
            }
        }
    }

    /// Start the background thread
    ///
    /// The thread runs until `shutdown()` is called.
    pub fn start(&self) -> JoinHandle<()> {
        let memory = Arc::clone(&self.memory);
        let disk = Arc::clone(&self.disk);
        let shutdown = Arc::clone(&self.shutdown);
        let stats = Arc::clone(&self.stats);
        let interval = self.interval;

        thread::spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "Sync scheduler started");
            while !shutdown.load(Ordering::Relaxed) {
                // Sleep in small steps so shutdown is observed promptly
                let sleep_interval = Duration::from_millis(100).min(interval);
                let mut elapsed = Duration::ZERO;

                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        debug!("Sync scheduler stopped");
                        return;
                    }
                    thread::sleep(sleep_interval);
                    elapsed += sleep_interval;
                }

                Self::run_once(&memory, &disk, &stats);
            }
            debug!("Sync scheduler stopped");
        })
    }

    /// Signal shutdown
    ///
    /// A pass already running completes first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Passes committed so far
    pub fn passes(&self) -> u64 {
        self.stats.passes.load(Ordering::Relaxed)
    }

    /// Passes failed so far
    pub fn failures(&self) -> u64 {
        self.stats.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, FaultyDisk};
    use std::time::Instant;
    use tierkv_durability::{DiskConfig, PartitionedStore};
    use tierkv_storage::MemoryStore;

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_scheduler_runs_passes() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(PartitionedStore::open(dir.path(), DiskConfig::for_testing()).unwrap());
        let memory = Arc::new(MemoryStore::new());
        memory.set(b"k".to_vec(), b"v".to_vec(), None).unwrap();

        let scheduler =
            SyncScheduler::new(Arc::clone(&memory), Arc::clone(&disk), Duration::from_millis(20));
        let handle = scheduler.start();

        wait_for(|| scheduler.passes() >= 2);
        scheduler.shutdown();
        handle.join().unwrap();

        assert!(scheduler.passes() >= 2);
        assert_eq!(scheduler.failures(), 0);
        assert_eq!(disk.get_routed(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_scheduler_counts_failures_and_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionedStore::open(dir.path(), DiskConfig::for_testing()).unwrap();
        let disk = Arc::new(FaultyDisk::new(store, Fault::Commit));
        let memory = Arc::new(MemoryStore::new());
        memory.set(b"k".to_vec(), b"v".to_vec(), None).unwrap();

        let scheduler = SyncScheduler::new(memory, Arc::clone(&disk), Duration::from_millis(20));
        let handle = scheduler.start();

        wait_for(|| scheduler.failures() >= 2);
        scheduler.shutdown();
        handle.join().unwrap();

        assert!(scheduler.failures() >= 2);
        assert_eq!(scheduler.passes(), 0);
        assert!(disk.inner().is_empty());
    }

    #[test]
    fn test_shutdown_is_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(PartitionedStore::open(dir.path(), DiskConfig::for_testing()).unwrap());
        let memory = Arc::new(MemoryStore::new());

        let scheduler = SyncScheduler::new(memory, disk, Duration::from_secs(3600));
        let handle = scheduler.start();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        scheduler.shutdown();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(scheduler.is_shutdown());
        assert_eq!(scheduler.passes(), 0);
    }
}
