//! Table snapshots
//!
//! Small append-only tables (identifiers, sequences, stamps, path origins)
//! are persisted as whole-file snapshots at checkpoint time. A snapshot is
//! all-or-nothing: unlike slot segments, a damaged row cannot be skipped
//! because later tables refer to it.
//!
//! # Snapshot Format
//!
//! ```text
//! magic("TSNP", 4) + version(4) + row_count(8) + row records...
//! ```
//!
//! Rows are [`Record`]s keyed by their position in the table.

use std::io;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::format::{scan_records, Record, ScanStop, ScannedRecord};
use crate::fs::write_atomic;

/// Magic bytes for table snapshots.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"TSNP";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_HEADER_SIZE: usize = 16;

/// Write `rows` as the snapshot at `path`, replacing any previous one.
///
/// Returns the number of rows written.
pub fn write_table<'a, I>(path: &Path, rows: I) -> io::Result<u64>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut buf = vec![0u8; SNAPSHOT_HEADER_SIZE];
    buf[0..4].copy_from_slice(SNAPSHOT_MAGIC);
    LittleEndian::write_u32(&mut buf[4..8], SNAPSHOT_VERSION);

    let mut count: u64 = 0;
    for row in rows {
        Record::encode_into(count as u32, row, &mut buf);
        count += 1;
    }
    LittleEndian::write_u64(&mut buf[8..16], count);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_atomic(path, &buf)?;
    Ok(count)
}

/// Read the snapshot at `path`, `Ok(None)` if it does not exist.
pub fn read_table(path: &Path) -> Result<Option<Vec<Vec<u8>>>, SnapshotError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SnapshotError::Io(e)),
    };

    if data.len() < SNAPSHOT_HEADER_SIZE || &data[0..4] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::InvalidHeader(path.to_path_buf()));
    }
    let version = LittleEndian::read_u32(&data[4..8]);
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }
    let expected = LittleEndian::read_u64(&data[8..16]);

    let scan = scan_records(&data[SNAPSHOT_HEADER_SIZE..]);
    if scan.stop != ScanStop::EndOfData {
        return Err(SnapshotError::Damaged {
            path: path.to_path_buf(),
            detail: format!("{:?}", scan.stop),
        });
    }

    let mut rows = Vec::with_capacity(scan.records.len());
    for record in scan.records {
        match record {
            ScannedRecord::Valid(record) => rows.push(record.payload),
            ScannedRecord::Corrupt { key, reason } => {
                return Err(SnapshotError::Damaged {
                    path: path.to_path_buf(),
                    detail: format!("row {key}: {reason}"),
                })
            }
        }
    }
    if rows.len() as u64 != expected {
        return Err(SnapshotError::Damaged {
            path: path.to_path_buf(),
            detail: format!("expected {expected} rows, found {}", rows.len()),
        });
    }

    Ok(Some(rows))
}

/// Errors reading a table snapshot
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Not a snapshot file
    #[error("invalid snapshot header in {0:?}")]
    InvalidHeader(PathBuf),

    /// Written by an unknown format version
    #[error("snapshot {path:?} has unsupported version {version}")]
    UnsupportedVersion {
        /// Offending file
        path: PathBuf,
        /// Version found
        version: u32,
    },

    /// Truncated or checksum-damaged rows
    #[error("snapshot {path:?} is damaged: {detail}")]
    Damaged {
        /// Offending file
        path: PathBuf,
        /// What was wrong
        detail: String,
    },

    /// I/O error
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SnapshotError> for tessera_core::Error {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(e) => tessera_core::Error::IoError(e),
            SnapshotError::Damaged { .. } => {
                tessera_core::Error::SerializationError(err.to_string())
            }
            other => tessera_core::Error::IncompatibleFormat(other.to_string()),
        }
    }
}
