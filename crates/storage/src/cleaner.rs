//! TTL cleanup background task
//!
//! TTLCleaner runs in a background thread and periodically removes expired
//! keys from a [`MemoryStore`]. Expired values are already invisible to
//! reads and to sync passes; the cleaner only reclaims memory.
//!
//! # Design Notes
//!
//! - Runs in background thread, doesn't block writes
//! - Graceful shutdown via atomic flag
//! - Configurable check interval

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::MemoryStore;

/// Background TTL cleanup task
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tierkv_storage::{MemoryStore, TTLCleaner};
///
/// let store = Arc::new(MemoryStore::new());
/// let cleaner = TTLCleaner::new(Arc::clone(&store), Duration::from_secs(60));
/// let handle = cleaner.start();
///
/// // ... use the store ...
///
/// cleaner.shutdown();
/// handle.join().unwrap();
/// ```
pub struct TTLCleaner {
    store: Arc<MemoryStore>,
    check_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl TTLCleaner {
    /// Create a new TTL cleaner
    pub fn new(store: Arc<MemoryStore>, check_interval: Duration) -> Self {
        Self {
            store,
            check_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one cleanup pass
    ///
    /// Returns the number of entries removed.
    pub fn run_once(store: &MemoryStore) -> usize {
        let expired = match store.find_expired_keys() {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "TTL scan failed");
                return 0;
            }
        };

        let mut removed = 0;
        for key in expired {
            match store.remove_if_expired(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "TTL removal failed");
                    break;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Removed expired keys");
        }
        removed
    }

    /// Start the background cleanup task
    ///
    /// The thread will run until `shutdown()` is called or the store is
    /// closed.
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let check_interval = self.check_interval;

        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                // Sleep in small steps so shutdown is observed promptly
                let sleep_interval = Duration::from_millis(100).min(check_interval);
                let mut elapsed = Duration::ZERO;

                while elapsed < check_interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(sleep_interval);
                    elapsed += sleep_interval;
                }

                if store.is_closed() {
                    return;
                }
                Self::run_once(&store);
            }
        })
    }

    /// Signal shutdown
    ///
    /// After calling this, the background thread will exit on its next iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
