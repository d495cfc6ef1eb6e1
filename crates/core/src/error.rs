//! Error types for tierkv
//!
//! One error enum is shared by both tiers and the synchronizer so that a
//! failure raised deep inside a store reaches the caller of `sync_all`
//! without conversion layers. We use `thiserror` for automatic `Display`
//! and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for tierkv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the tiered store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The disk store could not be opened or configured, or a partition
    /// could not be created. Fatal to store startup.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The memory-tier read view could not be established
    #[error("Read view unavailable: {0}")]
    ViewUnavailable(String),

    /// A put into a disk partition failed during a sync pass
    #[error("Write to partition {partition} failed: {source}")]
    PartitionWrite {
        /// Partition the key was routed to
        partition: String,
        /// Underlying store error
        #[source]
        source: Box<Error>,
    },

    /// The disk transaction failed to commit after all puts succeeded
    #[error("Commit failed: {source}")]
    Commit {
        /// Underlying store error
        #[source]
        source: Box<Error>,
    },

    /// Bucket does not exist in the disk store
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Persistent data failed validation
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Wrap a store error raised while writing into `partition`
    pub fn partition_write(partition: impl Into<String>, source: Error) -> Self {
        Error::PartitionWrite {
            partition: partition.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a store error raised while committing
    pub fn commit(source: Error) -> Self {
        Error::Commit {
            source: Box::new(source),
        }
    }
}
