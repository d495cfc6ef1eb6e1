//! MANIFEST file format
//!
//! The MANIFEST pins the partition table of a disk store. It is written once
//! when the store is created and checked on every open, so a store can never
//! be reopened with a routing function that would strand existing keys.
//!
//! # Format
//!
//! ```text
//! +--------------------+
//! | Magic: "TKVM"      | 4 bytes
//! | Format Version     | 4 bytes (u32 LE)
//! | Store UUID         | 16 bytes
//! | Partition Count    | 4 bytes (u32 LE)
//! | Hash Strategy      | 1 byte
//! | Prefix Length      | 4 bytes (u32 LE)
//! | Prefix             | variable (UTF-8)
//! | CRC32              | 4 bytes
//! +--------------------+
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use tierkv_core::{HashStrategy, PartitionTable};

/// MANIFEST magic bytes: "TKVM"
pub const MANIFEST_MAGIC: [u8; 4] = *b"TKVM";

/// Current MANIFEST format version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Smallest valid MANIFEST (empty prefix): 4 + 4 + 16 + 4 + 1 + 4 + 4
const MIN_MANIFEST_SIZE: usize = 37;

/// MANIFEST contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Unique store identifier (generated on creation)
    pub store_uuid: [u8; 16],
    /// Number of partitions the store was created with
    pub partition_count: u32,
    /// Routing hash the store was created with
    pub hash_strategy: HashStrategy,
    /// Partition name prefix
    pub partition_prefix: String,
}

impl Manifest {
    /// Create a MANIFEST for a fresh store
    pub fn new(store_uuid: [u8; 16], table: &PartitionTable) -> Self {
        Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            store_uuid,
            partition_count: table.count() as u32,
            hash_strategy: table.strategy(),
            partition_prefix: table.prefix().to_string(),
        }
    }

    /// Rebuild the partition table recorded in this MANIFEST
    pub fn partition_table(&self) -> PartitionTable {
        PartitionTable::new(
            self.partition_prefix.clone(),
            self.partition_count as usize,
            self.hash_strategy,
        )
    }

    /// Check that `table` routes exactly like the recorded table
    pub fn check_table(&self, table: &PartitionTable) -> Result<(), ManifestError> {
        if self.partition_count as usize != table.count() {
            return Err(ManifestError::Mismatch(format!(
                "partition count is {} but store was created with {}",
                table.count(),
                self.partition_count
            )));
        }
        if self.hash_strategy != table.strategy() {
            return Err(ManifestError::Mismatch(format!(
                "hash strategy is {} but store was created with {}",
                table.strategy(),
                self.hash_strategy
            )));
        }
        if self.partition_prefix != table.prefix() {
            return Err(ManifestError::Mismatch(format!(
                "partition prefix is {:?} but store was created with {:?}",
                table.prefix(),
                self.partition_prefix
            )));
        }
        Ok(())
    }

    /// Serialize MANIFEST to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MIN_MANIFEST_SIZE + self.partition_prefix.len());

        bytes.extend_from_slice(&MANIFEST_MAGIC);
        bytes.extend_from_slice(&self.format_version.to_le_bytes());
        bytes.extend_from_slice(&self.store_uuid);
        bytes.extend_from_slice(&self.partition_count.to_le_bytes());
        bytes.push(self.hash_strategy.code());
        bytes.extend_from_slice(&(self.partition_prefix.len() as u32).to_le_bytes());
        bytes.extend_from_slice(self.partition_prefix.as_bytes());

        // CRC32 of all preceding bytes
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());

        bytes
    }

    /// Deserialize MANIFEST from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        if bytes.len() < MIN_MANIFEST_SIZE {
            return Err(ManifestError::TooShort);
        }
        if bytes[0..4] != MANIFEST_MAGIC {
            return Err(ManifestError::InvalidMagic);
        }

        let (data, mut crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_crc = crc_bytes
            .read_u32::<LittleEndian>()
            .map_err(|_| ManifestError::TooShort)?;
        let computed_crc = crc32fast::hash(data);
        if stored_crc != computed_crc {
            return Err(ManifestError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let mut cursor = &data[4..];
        let short = |_| ManifestError::TooShort;

        let format_version = cursor.read_u32::<LittleEndian>().map_err(short)?;
        if format_version != MANIFEST_FORMAT_VERSION {
            return Err(ManifestError::UnsupportedVersion(format_version));
        }

        let mut store_uuid = [0u8; 16];
        cursor.read_exact(&mut store_uuid).map_err(short)?;

        let partition_count = cursor.read_u32::<LittleEndian>().map_err(short)?;
        if partition_count == 0 {
            return Err(ManifestError::Mismatch(
                "recorded partition count is zero".to_string(),
            ));
        }

        let strategy_code = cursor.read_u8().map_err(short)?;
        let hash_strategy = HashStrategy::from_code(strategy_code)
            .ok_or(ManifestError::UnknownHashStrategy(strategy_code))?;

        let prefix_len = cursor.read_u32::<LittleEndian>().map_err(short)? as usize;
        if cursor.len() != prefix_len {
            return Err(ManifestError::TooShort);
        }
        let partition_prefix =
            String::from_utf8(cursor.to_vec()).map_err(|_| ManifestError::InvalidPrefix)?;

        Ok(Manifest {
            format_version,
            store_uuid,
            partition_count,
            hash_strategy,
            partition_prefix,
        })
    }

    /// Load a MANIFEST from disk
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Persist MANIFEST atomically (write-fsync-rename)
    pub fn persist(&self, path: &Path) -> Result<(), ManifestError> {
        let temp_path = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&self.to_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, path)?;

        if let Some(parent) = path.parent() {
            if parent.exists() {
                File::open(parent)?.sync_all()?;
            }
        }

        Ok(())
    }
}

/// Errors that can occur with MANIFEST operations
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// MANIFEST file too short
    #[error("MANIFEST too short")]
    TooShort,

    /// Invalid magic bytes
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Format version this build cannot read
    #[error("Unsupported MANIFEST version {0}")]
    UnsupportedVersion(u32),

    /// Unknown hash strategy code
    #[error("Unknown hash strategy code {0}")]
    UnknownHashStrategy(u8),

    /// Prefix is not valid UTF-8
    #[error("Invalid partition prefix")]
    InvalidPrefix,

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected CRC32 value (from file)
        expected: u32,
        /// Computed CRC32 value
        computed: u32,
    },

    /// Requested partition table differs from the recorded one
    #[error("Partition table mismatch: {0}")]
    Mismatch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
