//! Data log record format
//!
//! Every committed write transaction becomes exactly one record, so a
//! transaction is applied on replay either completely or not at all.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)  │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────┴──────────┘
//! ```
//!
//! `Length` counts everything after itself. The CRC covers the format byte
//! and the payload.
//!
//! # Payload
//!
//! ```text
//! op_count u32 | op*
//! op = tag u8 | bucket_len u16 | bucket
//!      put:    key_len u32 | key | value_len u32 | value | expires_at u64
//!      delete: key_len u32 | key
//! ```
//!
//! `expires_at` is microseconds since epoch; 0 means the record never
//! expires. All integers are little-endian.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use tierkv_core::Timestamp;

/// Current record format version
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Size of the length prefix
pub const RECORD_LENGTH_SIZE: usize = 4;

const TAG_CREATE_BUCKET: u8 = 1;
const TAG_PUT: u8 = 2;
const TAG_DELETE: u8 = 3;

/// One mutation inside a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Create an empty bucket
    CreateBucket {
        /// Bucket name
        bucket: String,
    },
    /// Insert or overwrite a key
    Put {
        /// Bucket name
        bucket: String,
        /// Key bytes
        key: Vec<u8>,
        /// Value bytes
        value: Vec<u8>,
        /// Absolute expiry, `None` for never
        expires_at: Option<Timestamp>,
    },
    /// Remove a key
    Delete {
        /// Bucket name
        bucket: String,
        /// Key bytes
        key: Vec<u8>,
    },
}

impl LogOp {
    /// Bucket this op applies to
    pub fn bucket(&self) -> &str {
        match self {
            LogOp::CreateBucket { bucket }
            | LogOp::Put { bucket, .. }
            | LogOp::Delete { bucket, .. } => bucket,
        }
    }
}

/// Byte range of a put's value inside a framed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSpan {
    /// Offset from the start of the length prefix
    pub offset: u64,
    /// Value length
    pub len: u32,
}

/// A committed batch of ops
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRecord {
    /// Ops in application order
    pub ops: Vec<LogOp>,
}

impl LogRecord {
    /// Create a record from ops
    pub fn new(ops: Vec<LogOp>) -> Self {
        Self { ops }
    }

    /// Encode the full framed record (length, format, payload, CRC)
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let mut body = Vec::new();
        body.push(RECORD_FORMAT_VERSION);
        self.encode_payload(&mut body)?;

        let crc = crc32fast::hash(&body);
        let length = u32::try_from(body.len() + 4).map_err(|_| RecordError::TooLarge)?;

        let mut framed = Vec::with_capacity(RECORD_LENGTH_SIZE + body.len() + 4);
        framed.write_u32::<LittleEndian>(length)?;
        framed.extend_from_slice(&body);
        framed.write_u32::<LittleEndian>(crc)?;
        Ok(framed)
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), RecordError> {
        let op_count = u32::try_from(self.ops.len()).map_err(|_| RecordError::TooLarge)?;
        out.write_u32::<LittleEndian>(op_count)?;

        for op in &self.ops {
            let bucket = op.bucket().as_bytes();
            let bucket_len = u16::try_from(bucket.len()).map_err(|_| RecordError::TooLarge)?;
            match op {
                LogOp::CreateBucket { .. } => {
                    out.write_u8(TAG_CREATE_BUCKET)?;
                    out.write_u16::<LittleEndian>(bucket_len)?;
                    out.extend_from_slice(bucket);
                }
                LogOp::Put {
                    key,
                    value,
                    expires_at,
                    ..
                } => {
                    out.write_u8(TAG_PUT)?;
                    out.write_u16::<LittleEndian>(bucket_len)?;
                    out.extend_from_slice(bucket);
                    write_bytes(out, key)?;
                    write_bytes(out, value)?;
                    out.write_u64::<LittleEndian>(expires_at.map_or(0, |ts| ts.as_micros()))?;
                }
                LogOp::Delete { key, .. } => {
                    out.write_u8(TAG_DELETE)?;
                    out.write_u16::<LittleEndian>(bucket_len)?;
                    out.extend_from_slice(bucket);
                    write_bytes(out, key)?;
                }
            }
        }
        Ok(())
    }

    /// Decode a record body: everything after the length prefix
    ///
    /// Verifies the CRC and format version before parsing.
    pub fn decode_body(body: &[u8]) -> Result<Self, RecordError> {
        if body.len() < 1 + 4 {
            return Err(RecordError::Truncated);
        }
        let (data, mut crc_bytes) = body.split_at(body.len() - 4);
        let stored = crc_bytes.read_u32::<LittleEndian>()?;
        let computed = crc32fast::hash(data);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch { stored, computed });
        }

        let version = data[0];
        if version != RECORD_FORMAT_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }

        let mut cursor = &data[1..];
        let op_count = cursor.read_u32::<LittleEndian>()?;
        let mut ops = Vec::new();
        for _ in 0..op_count {
            let tag = cursor.read_u8()?;
            let bucket_len = cursor.read_u16::<LittleEndian>()? as usize;
            let bucket = String::from_utf8(read_exact_vec(&mut cursor, bucket_len)?)
                .map_err(|_| RecordError::InvalidBucketName)?;
            let op = match tag {
                TAG_CREATE_BUCKET => LogOp::CreateBucket { bucket },
                TAG_PUT => {
                    let key = read_bytes(&mut cursor)?;
                    let value = read_bytes(&mut cursor)?;
                    let expires_at = match cursor.read_u64::<LittleEndian>()? {
                        0 => None,
                        micros => Some(Timestamp::from_micros(micros)),
                    };
                    LogOp::Put {
                        bucket,
                        key,
                        value,
                        expires_at,
                    }
                }
                TAG_DELETE => {
                    let key = read_bytes(&mut cursor)?;
                    LogOp::Delete { bucket, key }
                }
                other => return Err(RecordError::UnknownOp(other)),
            };
            ops.push(op);
        }

        if !cursor.is_empty() {
            return Err(RecordError::TrailingBytes(cursor.len()));
        }
        Ok(LogRecord { ops })
    }

    /// Where each put's value lands in [`encode`](Self::encode)'s output
    ///
    /// One entry per op, in op order; only puts have a span.
    pub fn value_spans(&self) -> Vec<Option<ValueSpan>> {
        let mut offset = (RECORD_LENGTH_SIZE + 1 + 4) as u64;
        self.ops
            .iter()
            .map(|op| {
                offset += 1 + 2 + op.bucket().len() as u64;
                match op {
                    LogOp::CreateBucket { .. } => None,
                    LogOp::Put { key, value, .. } => {
                        offset += 4 + key.len() as u64 + 4;
                        let span = ValueSpan {
                            offset,
                            len: value.len() as u32,
                        };
                        offset += value.len() as u64 + 8;
                        Some(span)
                    }
                    LogOp::Delete { key, .. } => {
                        offset += 4 + key.len() as u64;
                        None
                    }
                }
            })
            .collect()
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), RecordError> {
    let len = u32::try_from(bytes.len()).map_err(|_| RecordError::TooLarge)?;
    out.write_u32::<LittleEndian>(len)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes(cursor: &mut &[u8]) -> Result<Vec<u8>, RecordError> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    read_exact_vec(cursor, len)
}

fn read_exact_vec(cursor: &mut &[u8], len: usize) -> Result<Vec<u8>, RecordError> {
    if cursor.len() < len {
        return Err(RecordError::Truncated);
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// Record encode/decode errors
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Record ended before all fields were read
    #[error("Record truncated")]
    Truncated,

    /// A field does not fit its length prefix
    #[error("Record field too large")]
    TooLarge,

    /// CRC mismatch
    #[error("Checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// CRC read from the record
        stored: u32,
        /// CRC computed over the record
        computed: u32,
    },

    /// Format version this build cannot read
    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u8),

    /// Unknown op tag
    #[error("Unknown op tag {0}")]
    UnknownOp(u8),

    /// Bucket name is not valid UTF-8
    #[error("Invalid bucket name")]
    InvalidBucketName,

    /// Bytes left over after the last op
    #[error("{0} trailing bytes after last op")]
    TrailingBytes(usize),
}

impl From<io::Error> for RecordError {
    fn from(e: io::Error) -> Self {
        // Reads only fail on a short buffer; writes go to a Vec and cannot fail
        match e.kind() {
            io::ErrorKind::UnexpectedEof => RecordError::Truncated,
            _ => RecordError::TooLarge,
        }
    }
}
