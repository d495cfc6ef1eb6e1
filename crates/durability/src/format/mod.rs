//! On-disk byte formats for the MANIFEST and the data log.
//!
//! Keeping serialization separate from operational logic (how the log is
//! appended, replayed and merged) makes format evolution easier to manage.

pub mod manifest;
pub mod record;

pub use manifest::{Manifest, ManifestError, MANIFEST_FORMAT_VERSION, MANIFEST_MAGIC};
pub use record::{
    LogOp, LogRecord, RecordError, ValueSpan, RECORD_FORMAT_VERSION, RECORD_LENGTH_SIZE,
};
