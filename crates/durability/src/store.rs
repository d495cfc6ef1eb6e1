//! Partitioned disk store
//!
//! `PartitionedStore` is the disk tier: a directory holding a MANIFEST and a
//! single data log. Every bucket's keys are indexed in memory; values stay
//! in the log and are read by position unless the store runs with
//! [`IndexMode::KeysAndValues`].
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── MANIFEST      # partition table, pinned at creation
//! └── data.log      # one record per committed transaction
//! ```
//!
//! # Concurrency
//!
//! Reads take the index read lock and, for values on disk, the reader's
//! read lock, in that order. Write transactions hold the log mutex from
//! `begin_write` until commit or rollback, so at most one is open per store.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tierkv_core::{
    BucketKind, DiskTier, Error, PartitionTable, Result, Timestamp, WriteTx,
};

use crate::config::{DiskConfig, DurabilityMode, IndexMode};
use crate::format::{LogOp, LogRecord, Manifest};
use crate::log::{DataLog, LogCounters, LogReader};

/// MANIFEST file name inside the store directory
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Data log file name inside the store directory
pub const DATA_LOG_FILE: &str = "data.log";

/// Ops per record when merge rewrites the log
const MERGE_CHUNK_OPS: usize = 4096;

/// Where a value lives
#[derive(Debug, Clone)]
enum ValueSlot {
    /// Held in the index
    Inline(Vec<u8>),
    /// Byte range of the data log
    Logged { offset: u64, len: u32 },
}

#[derive(Debug, Clone)]
struct DiskEntry {
    slot: ValueSlot,
    expires_at: Option<Timestamp>,
}

impl DiskEntry {
    fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

type BucketMap = BTreeMap<Vec<u8>, DiskEntry>;
type Index = BTreeMap<String, BucketMap>;

/// Result of a [`PartitionedStore::merge`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Live keys written to the new log
    pub live_keys: usize,
    /// Expired keys dropped
    pub expired_dropped: usize,
    /// Log size before merge
    pub bytes_before: u64,
    /// Log size after merge
    pub bytes_after: u64,
}

/// Disk-resident store with a fixed partition table
#[derive(Debug)]
pub struct PartitionedStore {
    dir: PathBuf,
    config: DiskConfig,
    partitions: PartitionTable,
    manifest: Manifest,
    index: RwLock<Index>,
    reader: RwLock<LogReader>,
    writer: Mutex<DataLog>,
    /// Set once the writer no longer appends to the file named `data.log`
    write_failed: AtomicBool,
    #[cfg(test)]
    fail_merge_reopen: AtomicBool,
}

impl PartitionedStore {
    /// Open or create a store in `dir`
    ///
    /// A fresh directory gets a MANIFEST recording the configured partition
    /// table. An existing store must be reopened with the same partition
    /// count, prefix and hash strategy. Every partition bucket that does not
    /// exist yet is created, then the log is fsynced.
    ///
    /// # Errors
    ///
    /// Every failure is reported as [`Error::Initialization`].
    pub fn open(dir: impl AsRef<Path>, config: DiskConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let init = |what: &str, e: &dyn std::fmt::Display| {
            Error::Initialization(format!("{} ({}): {}", what, dir.display(), e))
        };

        config
            .validate()
            .map_err(|e| init("invalid disk config", &e))?;
        std::fs::create_dir_all(&dir).map_err(|e| init("cannot create store directory", &e))?;

        let partitions = config.partition_table();
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let manifest =
                Manifest::load(&manifest_path).map_err(|e| init("cannot read MANIFEST", &e))?;
            manifest
                .check_table(&partitions)
                .map_err(|e| init("MANIFEST mismatch", &e))?;
            manifest
        } else {
            let manifest = Manifest::new(Uuid::new_v4().into_bytes(), &partitions);
            manifest
                .persist(&manifest_path)
                .map_err(|e| init("cannot write MANIFEST", &e))?;
            manifest
        };

        let log_path = dir.join(DATA_LOG_FILE);
        let mode = config.index_mode;
        let now = Timestamp::now();
        let mut index = Index::new();
        let mut replayed = 0usize;
        let mut log = DataLog::open_with(&log_path, config.durability, |offset, record| {
            apply_record(&mut index, offset, &record, mode, now);
            replayed += 1;
        })
        .map_err(|e| init("cannot open data log", &e))?;

        let missing: Vec<LogOp> = partitions
            .names()
            .iter()
            .filter(|name| !index.contains_key(name.as_str()))
            .map(|name| LogOp::CreateBucket {
                bucket: name.clone(),
            })
            .collect();
        let created = missing.len();
        if !missing.is_empty() {
            let record = LogRecord::new(missing);
            let start = log
                .append(&record)
                .map_err(|e| init("cannot create partitions", &e))?;
            apply_record(&mut index, start, &record, mode, now);
        }
        log.sync().map_err(|e| init("cannot sync data log", &e))?;
        let reader = LogReader::open(&log_path).map_err(|e| init("cannot open data log", &e))?;

        info!(
            path = %dir.display(),
            store_id = %Uuid::from_bytes(manifest.store_uuid),
            partitions = partitions.count(),
            hash = %partitions.strategy(),
            created_partitions = created,
            replayed_records = replayed,
            durability = config.durability.description(),
            index_mode = ?mode,
            "Disk store opened"
        );

        Ok(PartitionedStore {
            dir,
            config,
            partitions,
            manifest,
            index: RwLock::new(index),
            reader: RwLock::new(reader),
            writer: Mutex::new(log),
            write_failed: AtomicBool::new(false),
            #[cfg(test)]
            fail_merge_reopen: AtomicBool::new(false),
        })
    }

    /// Store directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    /// Unique identifier recorded in the MANIFEST
    pub fn store_id(&self) -> Uuid {
        Uuid::from_bytes(self.manifest.store_uuid)
    }

    fn load(&self, entry: &DiskEntry) -> Result<Vec<u8>> {
        match &entry.slot {
            ValueSlot::Inline(value) => Ok(value.clone()),
            ValueSlot::Logged { offset, len } => self.reader.read().read(*offset, *len),
        }
    }

    /// Get a live value from `bucket`
    ///
    /// # Errors
    ///
    /// Returns [`Error::BucketNotFound`] if the bucket does not exist and
    /// [`Error::Io`] if the value cannot be read from the data log.
    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let index = self.index.read();
        let entries = index
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let now = Timestamp::now();
        match entries.get(key).filter(|e| !e.is_expired_at(now)) {
            Some(entry) => self.load(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Get a live value from the partition `key` routes to
    pub fn get_routed(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get(self.partitions.route(key), key)
    }

    /// All live pairs in `bucket`, in key order
    pub fn get_all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let index = self.index.read();
        let entries = index
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let now = Timestamp::now();
        entries
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .map(|(k, e)| Ok((k.clone(), self.load(e)?)))
            .collect()
    }
    /// Remaining lifetime of a live key, `None` for keys that never expire
    pub fn ttl(&self, bucket: &str, key: &[u8]) -> Result<Option<Duration>> {
        let index = self.index.read();
        let entries = index
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let now = Timestamp::now();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .and_then(|e| e.expires_at)
            .and_then(|at| at.duration_since(now)))
    }

    /// Names of every bucket, sorted
    pub fn buckets(&self) -> Vec<String> {
        self.index.read().keys().cloned().collect()
    }

    /// Visit bucket names matching `pattern`
    ///
    /// `"*"` matches every bucket, `"name*"` matches by prefix, anything
    /// else must match exactly. Stops when `visit` returns `false`.
    pub fn iterate_buckets(
        &self,
        kind: BucketKind,
        pattern: &str,
        visit: &mut dyn FnMut(&str) -> bool,
    ) -> Result<()> {
        match kind {
            BucketKind::Tree => {}
        }
        let index = self.index.read();
        for name in index.keys() {
            let matched = if pattern == "*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                name.starts_with(prefix)
            } else {
                name == pattern
            };
            if matched && !visit(name) {
                break;
            }
        }
        Ok(())
    }

    /// Number of live keys across all buckets
    pub fn len(&self) -> usize {
        let now = Timestamp::now();
        self.index
            .read()
            .values()
            .map(|entries| entries.values().filter(|e| !e.is_expired_at(now)).count())
            .sum()
    }

    /// Check if no bucket holds a live key
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live keys in `bucket`
    pub fn bucket_len(&self, bucket: &str) -> Result<usize> {
        let index = self.index.read();
        let entries = index
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let now = Timestamp::now();
        Ok(entries.values().filter(|e| !e.is_expired_at(now)).count())
    }

    /// fsync the data log
    ///
    /// Blocks while a write transaction is open.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    /// fsync if Standard durability's interval has elapsed
    pub fn sync_if_overdue(&self) -> Result<bool> {
        self.writer.lock().sync_if_overdue()
    }

    /// Data log counters since open or the last merge
    pub fn log_counters(&self) -> LogCounters {
        self.writer.lock().counters()
    }

    /// Current data log size in bytes
    pub fn log_len(&self) -> u64 {
        self.writer.lock().len()
    }

    /// Rewrite the data log with only live entries
    ///
    /// Overwritten values, deletes and expired keys are dropped. The new log
    /// is written beside the old one, fsynced, then renamed over it, so a
    /// crash leaves either the old or the new log in place.
    ///
    /// If anything fails after the rename, the store refuses further writes
    /// until it is reopened; reads keep working.
    pub fn merge(&self) -> Result<MergeStats> {
        let mut log = self.writer.lock();
        self.check_writable()?;
        let now = Timestamp::now();
        let mode = self.config.index_mode;
        let log_path = self.dir.join(DATA_LOG_FILE);
        let merge_path = self.dir.join(format!("{}.merge", DATA_LOG_FILE));
        match std::fs::remove_file(&merge_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut stats = MergeStats {
            bytes_before: log.len(),
            ..Default::default()
        };
        let mut merged_index = Index::new();

        {
            let (mut merged, _) = DataLog::open(&merge_path, DurabilityMode::Never)?;
            let index = self.index.read();
            let reader = self.reader.read();
            let mut ops = Vec::with_capacity(MERGE_CHUNK_OPS);

            for (bucket, entries) in index.iter() {
                ops.push(LogOp::CreateBucket {
                    bucket: bucket.clone(),
                });
                for (key, entry) in entries {
                    if entry.is_expired_at(now) {
                        stats.expired_dropped += 1;
                        continue;
                    }
                    let value = match &entry.slot {
                        ValueSlot::Inline(value) => value.clone(),
                        ValueSlot::Logged { offset, len } => reader.read(*offset, *len)?,
                    };
                    ops.push(LogOp::Put {
                        bucket: bucket.clone(),
                        key: key.clone(),
                        value,
                        expires_at: entry.expires_at,
                    });
                    stats.live_keys += 1;
                    if ops.len() >= MERGE_CHUNK_OPS {
                        let record = LogRecord::new(std::mem::take(&mut ops));
                        let start = merged.append(&record)?;
                        apply_record(&mut merged_index, start, &record, mode, now);
                    }
                }
            }
            if !ops.is_empty() {
                let record = LogRecord::new(ops);
                let start = merged.append(&record)?;
                apply_record(&mut merged_index, start, &record, mode, now);
            }
            merged.sync()?;
            stats.bytes_after = merged.len();
        }

        std::fs::rename(&merge_path, &log_path)?;

        // From here the writer appends to an unlinked file until swapped
        let (new_log, new_reader) = match self.reopen_log(&log_path) {
            Ok(handles) => handles,
            Err(e) => return Err(self.fail_writes("cannot reopen merged data log", e)),
        };
        *log = new_log;
        {
            let mut index = self.index.write();
            *self.reader.write() = new_reader;
            *index = merged_index;
        }
        if let Err(e) = sync_dir(&self.dir) {
            return Err(self.fail_writes("cannot sync store directory after merge", e.into()));
        }

        info!(
            target: "tierkv::merge",
            live_keys = stats.live_keys,
            expired_dropped = stats.expired_dropped,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "Data log merged"
        );
        Ok(stats)
    }

    fn reopen_log(&self, path: &Path) -> Result<(DataLog, LogReader)> {
        #[cfg(test)]
        {
            if self.fail_merge_reopen.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "injected reopen failure").into());
            }
        }
        let log = DataLog::open_for_append(path, self.config.durability)?;
        let reader = LogReader::open(path)?;
        Ok((log, reader))
    }

    fn fail_writes(&self, what: &str, e: Error) -> Error {
        self.write_failed.store(true, Ordering::Release);
        error!(
            target: "tierkv::merge",
            path = %self.dir.display(),
            error = %e,
            "{}; refusing writes until the store is reopened",
            what
        );
        e
    }

    fn check_writable(&self) -> Result<()> {
        if self.write_failed.load(Ordering::Acquire) {
            Err(Error::InvalidOperation(format!(
                "disk store {} refuses writes after a failed merge; reopen it",
                self.dir.display()
            )))
        } else {
            Ok(())
        }
    }

    fn has_bucket(&self, name: &str) -> bool {
        self.index.read().contains_key(name)
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

/// Apply a record that starts at byte `start` of the data log
fn apply_record(
    index: &mut Index,
    start: u64,
    record: &LogRecord,
    mode: IndexMode,
    now: Timestamp,
) {
    for (op, span) in record.ops.iter().zip(record.value_spans()) {
        match op {
            LogOp::CreateBucket { bucket } => {
                index.entry(bucket.clone()).or_default();
            }
            LogOp::Put {
                bucket,
                key,
                value,
                expires_at,
            } => {
                let slot = match (mode, span) {
                    (IndexMode::KeysOnly, Some(span)) => ValueSlot::Logged {
                        offset: start + span.offset,
                        len: span.len,
                    },
                    _ => ValueSlot::Inline(value.clone()),
                };
                let entry = DiskEntry {
                    slot,
                    expires_at: *expires_at,
                };
                let entries = index.entry(bucket.clone()).or_default();
                if entry.is_expired_at(now) {
                    entries.remove(key);
                } else {
                    entries.insert(key.clone(), entry);
                }
            }
            LogOp::Delete { bucket, key } => {
                if let Some(entries) = index.get_mut(bucket) {
                    entries.remove(key);
                }
            }
        }
    }
}

impl DiskTier for PartitionedStore {
    type Tx<'a> = DiskWriteTx<'a>;

    fn bucket_exists(&self, kind: BucketKind, name: &str) -> Result<bool> {
        match kind {
            BucketKind::Tree => Ok(self.has_bucket(name)),
        }
    }

    /// Creating a bucket that already exists is a no-op.
    ///
    /// Blocks while a write transaction is open.
    fn create_bucket(&self, kind: BucketKind, name: &str) -> Result<()> {
        match kind {
            BucketKind::Tree => {}
        }
        let mut log = self.writer.lock();
        self.check_writable()?;
        if self.has_bucket(name) {
            return Ok(());
        }
        let record = LogRecord::new(vec![LogOp::CreateBucket {
            bucket: name.to_string(),
        }]);
        let start = log.append(&record)?;
        apply_record(
            &mut self.index.write(),
            start,
            &record,
            self.config.index_mode,
            Timestamp::now(),
        );
        debug!(bucket = name, "Bucket created");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] once a failed merge has left the
    /// store unable to write.
    fn begin_write(&self) -> Result<DiskWriteTx<'_>> {
        let log = self.writer.lock();
        self.check_writable()?;
        Ok(DiskWriteTx {
            store: self,
            log,
            ops: Vec::new(),
            finished: false,
        })
    }

    fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }
}

/// Write transaction on a [`PartitionedStore`]
///
/// Holds the store's log lock for its whole lifetime. Staged ops are
/// written as one log record on commit.
pub struct DiskWriteTx<'a> {
    store: &'a PartitionedStore,
    log: MutexGuard<'a, DataLog>,
    ops: Vec<LogOp>,
    finished: bool,
}

impl DiskWriteTx<'_> {
    /// Stage a delete of `key` from `bucket`
    pub fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<()> {
        self.check_bucket(bucket)?;
        self.ops.push(LogOp::Delete {
            bucket: bucket.to_string(),
            key: key.to_vec(),
        });
        Ok(())
    }

    /// Number of staged ops
    pub fn pending(&self) -> usize {
        self.ops.len()
    }

    fn check_bucket(&self, bucket: &str) -> Result<()> {
        if self.store.has_bucket(bucket) {
            Ok(())
        } else {
            Err(Error::BucketNotFound(bucket.to_string()))
        }
    }
}

impl WriteTx for DiskWriteTx<'_> {
    /// `ttl` of `None` or zero means the entry never expires.
    fn put(
        &mut self,
        bucket: &str,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_bucket(bucket)?;
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Timestamp::now().saturating_add(ttl));
        self.ops.push(LogOp::Put {
            bucket: bucket.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at,
        });
        Ok(())
    }

    fn commit(mut self) -> Result<()> {
        self.finished = true;
        if self.ops.is_empty() {
            return Ok(());
        }
        let record = LogRecord::new(std::mem::take(&mut self.ops));
        let start = self.log.append(&record)?;

        let mut index = self.store.index.write();
        apply_record(
            &mut index,
            start,
            &record,
            self.store.config.index_mode,
            Timestamp::now(),
        );
        debug!(ops = record.ops.len(), "Write transaction committed");
        Ok(())
    }

    fn rollback(mut self) {
        self.finished = true;
        debug!(ops = self.ops.len(), "Write transaction rolled back");
    }
}

impl Drop for DiskWriteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if self.ops.is_empty() {
                debug!("Empty write transaction dropped");
            } else {
                warn!(ops = self.ops.len(), "Write transaction dropped without commit");
            }
        }
    }
}
