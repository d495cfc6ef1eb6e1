//! Append-only data log
//!
//! The disk store keeps a single log file holding one framed
//! [`LogRecord`] per committed transaction. On open the log is replayed
//! from the start; a torn or checksum-failing tail (a crash during append)
//! is truncated away so the next append starts on a record boundary.
//!
//! # Durability Modes
//!
//! - `Never`: append only, fsync on explicit [`DataLog::sync`]
//! - `Always`: fsync before `append` returns
//! - `Standard`: fsync once `batch_size` appends or `interval_ms` have
//!   accumulated since the last fsync

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, warn};

use tierkv_core::{Error, Result};

use crate::config::DurabilityMode;
use crate::format::{LogRecord, RecordError, RECORD_LENGTH_SIZE};

/// Counters exposed for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounters {
    /// Records appended since open
    pub appends: u64,
    /// fsync calls since open
    pub syncs: u64,
    /// Bytes appended since open
    pub bytes_written: u64,
}

/// Single-file append-only log
#[derive(Debug)]
pub struct DataLog {
    file: File,
    path: PathBuf,
    durability: DurabilityMode,
    /// Byte offset of the end of the last complete record
    len: u64,
    appends_since_sync: usize,
    last_sync_time: Instant,
    has_unsynced_data: bool,
    counters: LogCounters,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl DataLog {
    /// Open (or create) the log at `path` and replay it
    ///
    /// Returns the log positioned for appending plus every complete record
    /// in write order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if a record passes its checksum but
    /// cannot be decoded, and [`Error::Io`] on file errors.
    pub fn open(path: &Path, durability: DurabilityMode) -> Result<(Self, Vec<LogRecord>)> {
        let mut records = Vec::new();
        let log = Self::open_with(path, durability, |_, record| records.push(record))?;
        Ok((log, records))
    }

    /// Open (or create) the log at `path`, handing each complete record to
    /// `visit` together with the offset it starts at
    ///
    /// Records are read one at a time, so replay never holds more than one
    /// record in memory.
    pub fn open_with(
        path: &Path,
        durability: DurabilityMode,
        mut visit: impl FnMut(u64, LogRecord),
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let valid_len = replay(&file, file_len, &mut visit)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                dropped_bytes = file_len - valid_len,
                "Truncating torn tail of data log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(path = %path.display(), len = valid_len, "Data log replayed");
        Ok(Self::positioned(file, path, durability, valid_len))
    }

    /// Open an existing log for appending without replaying it
    ///
    /// Used after merge, when the caller already knows what the file holds.
    pub fn open_for_append(path: &Path, durability: DurabilityMode) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self::positioned(file, path, durability, len))
    }

    fn positioned(file: File, path: &Path, durability: DurabilityMode, len: u64) -> Self {
        DataLog {
            file,
            path: path.to_path_buf(),
            durability,
            len,
            appends_since_sync: 0,
            last_sync_time: Instant::now(),
            has_unsynced_data: false,
            counters: LogCounters::default(),
            #[cfg(test)]
            fail_next_sync: false,
        }
    }

    /// Append one record, returning the offset it starts at
    ///
    /// If the write or the fsync the durability mode calls for fails, the
    /// file is cut back to its previous length, so a failed append never
    /// leaves a record behind that replay would apply.
    pub fn append(&mut self, record: &LogRecord) -> Result<u64> {
        let bytes = record
            .encode()
            .map_err(|e| Error::InvalidOperation(format!("cannot encode record: {}", e)))?;

        let start = self.len;
        if let Err(e) = self.file.write_all(&bytes) {
            self.rewind();
            return Err(e.into());
        }

        self.appends_since_sync += 1;
        self.has_unsynced_data = true;
        if let Err(e) = self.maybe_sync() {
            self.appends_since_sync -= 1;
            self.rewind();
            return Err(e);
        }

        self.len += bytes.len() as u64;
        self.counters.appends += 1;
        self.counters.bytes_written += bytes.len() as u64;
        Ok(start)
    }

    fn rewind(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|_| self.file.seek(SeekFrom::Start(self.len)).map(|_| ()));
        if let Err(e) = restored {
            warn!(path = %self.path.display(), error = %e, "Failed to cut back data log after write error");
        }
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.durability {
            DurabilityMode::Always => self.sync(),
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                if self.appends_since_sync >= batch_size
                    || self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms
                {
                    self.sync()
                } else {
                    Ok(())
                }
            }
            DurabilityMode::Never => Ok(()),
        }
    }

    /// fsync everything appended so far
    pub fn sync(&mut self) -> Result<()> {
        #[cfg(test)]
        {
            if std::mem::take(&mut self.fail_next_sync) {
                return Err(io::Error::new(io::ErrorKind::Other, "injected fsync failure").into());
            }
        }
        self.file.sync_data()?;
        self.counters.syncs += 1;
        self.appends_since_sync = 0;
        self.last_sync_time = Instant::now();
        self.has_unsynced_data = false;
        Ok(())
    }

    /// Make the next fsync fail
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    /// fsync if Standard mode's interval has elapsed with data pending
    ///
    /// Returns `true` if a sync was performed.
    pub fn sync_if_overdue(&mut self) -> Result<bool> {
        if !self.has_unsynced_data {
            return Ok(false);
        }
        if let DurabilityMode::Standard { interval_ms, .. } = self.durability {
            if self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms {
                self.sync()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Length of the log in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if the log holds no records
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durability mode
    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }

    /// Counters since open
    pub fn counters(&self) -> LogCounters {
        self.counters
    }
}

/// Read-only handle for fetching values out of the log by position
///
/// Positional reads do not move a shared cursor, so any number of readers
/// can use one handle at once, alongside the appending [`DataLog`].
#[derive(Debug)]
pub struct LogReader {
    file: File,
}

impl LogReader {
    /// Open the log at `path` for reading
    pub fn open(path: &Path) -> Result<Self> {
        Ok(LogReader {
            file: File::open(path)?,
        })
    }

    /// Read `len` bytes starting at `offset`
    pub fn read(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total_read = 0;
    while total_read < buf.len() {
        let n = file.seek_read(&mut buf[total_read..], offset + total_read as u64)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF"));
        }
        total_read += n;
    }
    Ok(())
}

/// Visit every complete record in the first `file_len` bytes of `file`
///
/// Returns the byte length the records span. Anything after that length is
/// a torn tail.
fn replay(file: &File, file_len: u64, visit: &mut dyn FnMut(u64, LogRecord)) -> Result<u64> {
    let mut reader = BufReader::new(file);
    let mut offset = 0u64;

    while file_len - offset >= RECORD_LENGTH_SIZE as u64 {
        let length = reader.read_u32::<LittleEndian>()? as u64;
        let end = offset + RECORD_LENGTH_SIZE as u64 + length;
        if end > file_len {
            break;
        }

        let mut body = vec![0u8; length as usize];
        reader.read_exact(&mut body)?;
        match LogRecord::decode_body(&body) {
            Ok(record) => visit(offset, record),
            Err(RecordError::ChecksumMismatch { .. }) | Err(RecordError::Truncated) => break,
            Err(e) => {
                return Err(Error::Corruption(format!(
                    "data log record at offset {}: {}",
                    offset, e
                )))
            }
        }
        offset = end;
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::LogOp;

    fn put(key: &str) -> LogRecord {
        LogRecord::new(vec![LogOp::Put {
            bucket: "bucket_0".to_string(),
            key: key.as_bytes().to_vec(),
            value: b"v".to_vec(),
            expires_at: None,
        }])
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        {
            let (mut log, records) = DataLog::open(&path, DurabilityMode::Never).unwrap();
            assert!(records.is_empty());
            assert!(log.is_empty());
            log.append(&put("a")).unwrap();
            log.append(&put("b")).unwrap();
            log.sync().unwrap();
        }

        let (log, records) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        assert_eq!(records, vec![put("a"), put("b")]);
        assert_eq!(log.len(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let good_len = {
            let (mut log, _) = DataLog::open(&path, DurabilityMode::Never).unwrap();
            log.append(&put("a")).unwrap();
            let good_len = log.len();
            log.append(&put("b")).unwrap();
            good_len
        };

        // Chop the second record in half
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(good_len + (full_len - good_len) / 2).unwrap();
        drop(file);

        let (mut log, records) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        assert_eq!(records, vec![put("a")]);
        assert_eq!(log.len(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        // Appends continue from the clean boundary
        log.append(&put("c")).unwrap();
        drop(log);
        let (_, records) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        assert_eq!(records, vec![put("a"), put("c")]);
    }

    #[test]
    fn test_corrupt_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let good_len = {
            let (mut log, _) = DataLog::open(&path, DurabilityMode::Never).unwrap();
            log.append(&put("a")).unwrap();
            let good_len = log.len();
            log.append(&put("b")).unwrap();
            good_len
        };

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let (log, records) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        assert_eq!(records, vec![put("a")]);
        assert_eq!(log.len(), good_len);
    }

    #[test]
    fn test_always_mode_syncs_every_append() {
        let dir = tempfile::tempdir().unwrap();
        let (mut log, _) = DataLog::open(&dir.path().join("data.log"), DurabilityMode::Always).unwrap();
        log.append(&put("a")).unwrap();
        log.append(&put("b")).unwrap();
        assert_eq!(log.counters().syncs, 2);
    }

    #[test]
    fn test_standard_mode_batches_syncs() {
        let dir = tempfile::tempdir().unwrap();
        let mode = DurabilityMode::Standard {
            interval_ms: 60_000,
            batch_size: 3,
        };
        let (mut log, _) = DataLog::open(&dir.path().join("data.log"), mode).unwrap();
        log.append(&put("a")).unwrap();
        log.append(&put("b")).unwrap();
        assert_eq!(log.counters().syncs, 0);
        log.append(&put("c")).unwrap();
        assert_eq!(log.counters().syncs, 1);
        assert!(!log.sync_if_overdue().unwrap());
    }

    #[test]
    fn test_never_mode_does_not_sync() {
        let dir = tempfile::tempdir().unwrap();
        let (mut log, _) = DataLog::open(&dir.path().join("data.log"), DurabilityMode::Never).unwrap();
        for i in 0..10 {
            log.append(&put(&i.to_string())).unwrap();
        }
        assert_eq!(log.counters().syncs, 0);
        assert_eq!(log.counters().appends, 10);
    }

    #[test]
    fn test_append_returns_record_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let (mut log, _) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        let first = log.append(&put("a")).unwrap();
        let second = log.append(&put("b")).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, put("a").encode().unwrap().len() as u64);
        drop(log);

        let mut offsets = Vec::new();
        DataLog::open_with(&path, DurabilityMode::Never, |offset, _| offsets.push(offset)).unwrap();
        assert_eq!(offsets, vec![first, second]);
    }

    #[test]
    fn test_reader_fetches_values_by_span() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let (mut log, _) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        let record = LogRecord::new(vec![LogOp::Put {
            bucket: "bucket_0".to_string(),
            key: b"k".to_vec(),
            value: b"stored on disk".to_vec(),
            expires_at: None,
        }]);
        log.append(&put("a")).unwrap();
        let start = log.append(&record).unwrap();

        let span = record.value_spans()[0].unwrap();
        let reader = LogReader::open(&path).unwrap();
        assert_eq!(
            reader.read(start + span.offset, span.len).unwrap(),
            b"stored on disk".to_vec()
        );
        assert!(reader.read(log.len(), 1).is_err());
    }

    #[test]
    fn test_failed_fsync_cuts_record_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");

        let (mut log, _) = DataLog::open(&path, DurabilityMode::Always).unwrap();
        log.append(&put("a")).unwrap();
        let len = log.len();

        log.fail_next_sync();
        assert!(log.append(&put("b")).is_err());
        assert_eq!(log.len(), len);
        assert_eq!(log.counters().appends, 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);

        log.append(&put("c")).unwrap();
        drop(log);
        let (_, records) = DataLog::open(&path, DurabilityMode::Never).unwrap();
        assert_eq!(records, vec![put("a"), put("c")]);
    }

    #[test]
    fn test_sync_if_overdue_flushes_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mode = DurabilityMode::Standard {
            interval_ms: 200,
            batch_size: 1000,
        };
        let (mut log, _) = DataLog::open(&dir.path().join("data.log"), mode).unwrap();
        assert!(!log.sync_if_overdue().unwrap());

        log.append(&put("a")).unwrap();
        assert_eq!(log.counters().syncs, 0);
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(log.sync_if_overdue().unwrap());
        assert!(!log.sync_if_overdue().unwrap());
    }
}
