//! Self-length-prefixed record format.
//!
//! Every on-disk file in Tessera (slot store segments and table snapshots)
//! is a header followed by a run of records. Each record carries its own
//! length, so a file can be scanned front to back without an index, and a
//! record cut short by a crash is recognisable as such.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Key (4)      │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! `Length` counts every byte after itself (key + payload + CRC). The CRC
//! covers key and payload.

use byteorder::{ByteOrder, LittleEndian};

/// Bytes taken by the length prefix
pub const LENGTH_SIZE: usize = 4;

/// Bytes of framing around a payload (length + key + CRC)
pub const RECORD_OVERHEAD: usize = LENGTH_SIZE + 4 + 4;

/// Largest accepted record body; anything bigger is treated as garbage
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key (slot sequence, or row index for tables)
    pub key: u32,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Record {
    /// Create a record
    pub fn new(key: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }

    /// Append the encoded record to `buf`
    pub fn encode_into(key: u32, payload: &[u8], buf: &mut Vec<u8>) {
        let body_len = 4 + payload.len() + 4;
        let start = buf.len();
        buf.resize(start + LENGTH_SIZE + 4, 0);
        LittleEndian::write_u32(&mut buf[start..start + 4], body_len as u32);
        LittleEndian::write_u32(&mut buf[start + 4..start + 8], key);
        buf.extend_from_slice(payload);

        let crc = crc32fast::hash(&buf[start + LENGTH_SIZE..]);
        let mut crc_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut crc_bytes, crc);
        buf.extend_from_slice(&crc_bytes);
    }

    /// Encode to a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_OVERHEAD + self.payload.len());
        Self::encode_into(self.key, &self.payload, &mut buf);
        buf
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(data: &[u8]) -> Result<(Record, usize), RecordError> {
        if data.len() < LENGTH_SIZE {
            return Err(RecordError::InsufficientData);
        }
        let body_len = LittleEndian::read_u32(&data[..LENGTH_SIZE]) as usize;
        if body_len < 8 || body_len > MAX_RECORD_SIZE {
            return Err(RecordError::InvalidLength(body_len));
        }
        let total = LENGTH_SIZE + body_len;
        if data.len() < total {
            return Err(RecordError::InsufficientData);
        }

        let body = &data[LENGTH_SIZE..total];
        let (covered, crc_bytes) = body.split_at(body_len - 4);
        let stored = LittleEndian::read_u32(crc_bytes);
        let computed = crc32fast::hash(covered);
        let key = LittleEndian::read_u32(&covered[..4]);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch {
                key,
                length: total,
                stored,
                computed,
            });
        }

        Ok((
            Record {
                key,
                payload: covered[4..].to_vec(),
            },
            total,
        ))
    }
}

/// Errors decoding a single record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Not enough bytes for the declared record (truncated tail)
    #[error("insufficient data for record")]
    InsufficientData,

    /// Length prefix is impossible
    #[error("invalid record length: {0}")]
    InvalidLength(usize),

    /// CRC does not match; the length prefix is still usable
    #[error(
        "record checksum mismatch (key {key}): stored {stored:#010x}, computed {computed:#010x}"
    )]
    ChecksumMismatch {
        /// Key as read (not trustworthy)
        key: u32,
        /// Full record length including the prefix
        length: usize,
        /// CRC stored in the record
        stored: u32,
        /// CRC computed over the record
        computed: u32,
    },
}

/// One entry produced by [`scan_records`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedRecord {
    /// Record decoded and verified
    Valid(Record),
    /// Record framing was intact but its checksum failed
    Corrupt {
        /// Key as read from the damaged record
        key: u32,
        /// Description of the damage
        reason: String,
    },
}

/// Why a scan stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStop {
    /// Consumed every byte
    EndOfData,
    /// Trailing bytes formed an incomplete record (crash mid-write)
    PartialRecord {
        /// Offset where the partial record starts
        offset: usize,
    },
    /// A length prefix was impossible; nothing after it can be framed
    Garbage {
        /// Offset of the bad length prefix
        offset: usize,
    },
}

/// Result of scanning a run of records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordScan {
    /// Records in file order
    pub records: Vec<ScannedRecord>,
    /// Offset just past the last framed record
    pub valid_end: usize,
    /// Why scanning stopped
    pub stop: ScanStop,
}

/// Scan consecutive records from `data`.
///
/// Checksum failures with a sane length are reported and skipped; a
/// truncated tail or impossible length ends the scan.
pub fn scan_records(data: &[u8]) -> RecordScan {
    let mut records = Vec::new();
    let mut offset = 0;
    let mut stop = ScanStop::EndOfData;

    while offset < data.len() {
        match Record::from_bytes(&data[offset..]) {
            Ok((record, consumed)) => {
                records.push(ScannedRecord::Valid(record));
                offset += consumed;
            }
            Err(RecordError::InsufficientData) => {
                stop = ScanStop::PartialRecord { offset };
                break;
            }
            Err(RecordError::ChecksumMismatch {
                key,
                length,
                stored,
                computed,
            }) => {
                tracing::warn!(offset, key, "skipping record with checksum mismatch");
                records.push(ScannedRecord::Corrupt {
                    key,
                    reason: format!(
                        "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
                    ),
                });
                offset += length;
            }
            Err(RecordError::InvalidLength(length)) => {
                tracing::warn!(offset, length, "unframeable record, ignoring remainder");
                stop = ScanStop::Garbage { offset };
                break;
            }
        }
    }

    RecordScan {
        records,
        valid_end: offset,
        stop,
    }
}
