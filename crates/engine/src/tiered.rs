//! TieredStore: one memory tier, one disk tier and their background workers
//!
//! Applications write to the memory tier and read from it; the disk tier is
//! the durable copy, filled by sync passes. With Standard durability a
//! flush thread fsyncs the data log once `interval_ms` has passed since the
//! last fsync, so a quiet period after a commit does not leave it unsynced.
//!
//! # Example
//!
//! ```ignore
//! let store = TieredStore::open(TierConfig::new("/var/lib/app/kv"))?;
//! store.memory().set("user:1", "alice", None)?;
//! let report = store.sync_all()?;
//! store.close()?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tierkv_core::{Error, Result};
use tierkv_durability::{DurabilityMode, PartitionedStore};
use tierkv_storage::{MemoryStore, TTLCleaner};

use crate::config::TierConfig;
use crate::scheduler::SyncScheduler;
use crate::sync::{sync_all, SyncReport};

struct Workers {
    cleaner: Option<(TTLCleaner, JoinHandle<()>)>,
    scheduler: Option<(SyncScheduler<MemoryStore, PartitionedStore>, JoinHandle<()>)>,
    flusher: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl Workers {
    fn stop(&mut self) {
        if let Some((scheduler, handle)) = self.scheduler.take() {
            scheduler.shutdown();
            if handle.join().is_err() {
                warn!("Sync scheduler thread panicked");
            }
        }
        if let Some((cleaner, handle)) = self.cleaner.take() {
            cleaner.shutdown();
            if handle.join().is_err() {
                warn!("TTL cleaner thread panicked");
            }
        }
        if let Some((shutdown, handle)) = self.flusher.take() {
            shutdown.store(true, Ordering::Relaxed);
            if handle.join().is_err() {
                warn!("Data log flush thread panicked");
            }
        }
    }
}

/// Spawn the thread that fsyncs the data log once Standard mode's interval
/// has elapsed with unsynced commits
fn spawn_log_flusher(
    disk: Arc<PartitionedStore>,
    interval: Duration,
) -> Result<(Arc<AtomicBool>, JoinHandle<()>)> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&shutdown);
    let step = Duration::from_millis(100).min(interval);

    let handle = std::thread::Builder::new()
        .name("tierkv-log-flush".to_string())
        .spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "Data log flusher started");
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(step);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = disk.sync_if_overdue() {
                    warn!(error = %e, "Background data log fsync failed");
                }
            }
            debug!("Data log flusher stopped");
        })
        .map_err(|e| Error::Initialization(format!("cannot spawn data log flusher: {}", e)))?;
    Ok((shutdown, handle))
}

/// Memory tier plus disk tier
pub struct TieredStore {
    memory: Arc<MemoryStore>,
    disk: Arc<PartitionedStore>,
    config: TierConfig,
    workers: Mutex<Workers>,
}

impl TieredStore {
    /// Open the disk store and start the configured background workers
    ///
    /// # Errors
    ///
    /// Returns [`Error::Initialization`] if the config is invalid or the disk
    /// store cannot be opened.
    pub fn open(config: TierConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Initialization(e.to_string()))?;

        let disk = Arc::new(PartitionedStore::open(&config.disk_path, config.disk.clone())?);
        let memory = Arc::new(MemoryStore::new());

        let flusher = match config.disk.durability {
            DurabilityMode::Standard { interval_ms, .. } => Some(spawn_log_flusher(
                Arc::clone(&disk),
                Duration::from_millis(interval_ms.max(1)),
            )?),
            DurabilityMode::Always | DurabilityMode::Never => None,
        };
        let cleaner = config.ttl_cleanup_interval().map(|interval| {
            let cleaner = TTLCleaner::new(Arc::clone(&memory), interval);
            let handle = cleaner.start();
            (cleaner, handle)
        });
        let scheduler = config.sync_interval().map(|interval| {
            let scheduler = SyncScheduler::new(Arc::clone(&memory), Arc::clone(&disk), interval);
            let handle = scheduler.start();
            (scheduler, handle)
        });

        info!(
            path = %config.disk_path.display(),
            sync_interval_ms = config.sync_interval_ms,
            ttl_cleanup_interval_ms = config.ttl_cleanup_interval_ms,
            "Tiered store opened"
        );

        Ok(TieredStore {
            memory,
            disk,
            config,
            workers: Mutex::new(Workers {
                cleaner,
                scheduler,
                flusher,
            }),
        })
    }

    /// The memory tier
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// The disk tier
    pub fn disk(&self) -> &Arc<PartitionedStore> {
        &self.disk
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Run a full sync pass now
    ///
    /// See [`sync_all`] for the failure modes and consistency caveats.
    pub fn sync_all(&self) -> Result<SyncReport> {
        sync_all(&*self.memory, &*self.disk)
    }

    /// Passes committed by the background scheduler, if it runs
    pub fn scheduled_passes(&self) -> Option<u64> {
        self.workers
            .lock()
            .scheduler
            .as_ref()
            .map(|(scheduler, _)| scheduler.passes())
    }

    /// Stop background workers, close the memory tier and fsync the disk tier
    ///
    /// Memory contents not yet synced are lost; call [`sync_all`](Self::sync_all)
    /// first to keep them.
    pub fn close(&self) -> Result<()> {
        self.workers.lock().stop();
        self.memory.close();
        self.disk.sync()?;
        info!(path = %self.config.disk_path.display(), "Tiered store closed");
        Ok(())
    }
}

impl Drop for TieredStore {
    fn drop(&mut self) {
        self.workers.get_mut().stop();
    }
}
