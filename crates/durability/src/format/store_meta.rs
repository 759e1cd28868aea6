//! Store format sidecar.
//!
//! Every slot store directory carries one `<prefix>format.meta` file that
//! records how its segments were written. A store refuses to open files it
//! cannot interpret rather than guessing.
//!
//! # Binary Format (20 bytes)
//!
//! ```text
//! magic("TFMT", 4) + format_version(4) + schema_version(4)
//! + elements_per_segment(4) + crc32(4) = 20 bytes
//! ```

use std::path::{Path, PathBuf};

use crate::fs::write_atomic;

/// Magic bytes for store format sidecars.
pub const STORE_META_MAGIC: &[u8; 4] = b"TFMT";

/// Current on-disk layout version for segments and records.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Total size of a serialized `StoreMeta` in bytes.
pub const STORE_META_SIZE: usize = 20;

/// Layout description persisted next to a store's segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMeta {
    /// Record and segment layout version.
    pub format_version: u32,
    /// Version of the payload schema chosen by the caller.
    pub schema_version: u32,
    /// Slots per segment file.
    pub elements_per_segment: u32,
}

impl StoreMeta {
    /// Metadata for a store written by this build.
    pub fn current(schema_version: u32, elements_per_segment: u32) -> Self {
        StoreMeta {
            format_version: STORE_FORMAT_VERSION,
            schema_version,
            elements_per_segment,
        }
    }

    /// Path of the sidecar for stores using `prefix`.
    pub fn meta_path(dir: &Path, prefix: &str) -> PathBuf {
        dir.join(format!("{prefix}format.meta"))
    }

    /// Write the sidecar using write-fsync-rename.
    pub fn write_to_file(&self, dir: &Path, prefix: &str) -> Result<(), StoreMetaError> {
        write_atomic(&Self::meta_path(dir, prefix), &self.to_bytes())?;
        Ok(())
    }

    /// Read the sidecar, `Ok(None)` if the store has never been written.
    pub fn read_from_file(dir: &Path, prefix: &str) -> Result<Option<Self>, StoreMetaError> {
        match std::fs::read(Self::meta_path(dir, prefix)) {
            Ok(data) => Ok(Some(Self::from_bytes(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreMetaError::Io(e)),
        }
    }

    /// Check that a store opened with `expected` can read these files.
    pub fn check_compatible(&self, expected: &StoreMeta) -> Result<(), StoreMetaError> {
        if self.format_version != expected.format_version {
            return Err(StoreMetaError::Mismatch {
                field: "format_version",
                found: self.format_version,
                expected: expected.format_version,
            });
        }
        if self.schema_version != expected.schema_version {
            return Err(StoreMetaError::Mismatch {
                field: "schema_version",
                found: self.schema_version,
                expected: expected.schema_version,
            });
        }
        if self.elements_per_segment != expected.elements_per_segment {
            return Err(StoreMetaError::Mismatch {
                field: "elements_per_segment",
                found: self.elements_per_segment,
                expected: expected.elements_per_segment,
            });
        }
        Ok(())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STORE_META_SIZE);
        buf.extend_from_slice(STORE_META_MAGIC);
        buf.extend_from_slice(&self.format_version.to_le_bytes());
        buf.extend_from_slice(&self.schema_version.to_le_bytes());
        buf.extend_from_slice(&self.elements_per_segment.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize, validating magic and CRC.
    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreMetaError> {
        if data.len() < STORE_META_SIZE {
            return Err(StoreMetaError::TooShort {
                expected: STORE_META_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..4] != STORE_META_MAGIC {
            return Err(StoreMetaError::InvalidMagic);
        }

        let crc_offset = STORE_META_SIZE - 4;
        let stored = read_u32(data, crc_offset);
        let computed = crc32fast::hash(&data[..crc_offset]);
        if stored != computed {
            return Err(StoreMetaError::ChecksumMismatch { stored, computed });
        }

        Ok(StoreMeta {
            format_version: read_u32(data, 4),
            schema_version: read_u32(data, 8),
            elements_per_segment: read_u32(data, 12),
        })
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// Errors reading, writing or validating a store sidecar.
#[derive(Debug, thiserror::Error)]
pub enum StoreMetaError {
    /// Data too short to contain a sidecar.
    #[error("store meta too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Magic bytes do not match `TFMT`.
    #[error("invalid store meta magic bytes")]
    InvalidMagic,

    /// CRC32 checksum mismatch.
    #[error("store meta checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the file.
        stored: u32,
        /// CRC computed from the data.
        computed: u32,
    },

    /// The files were written with a different layout.
    #[error("store {field} is {found}, this build expects {expected}")]
    Mismatch {
        /// Field that differs.
        field: &'static str,
        /// Value on disk.
        found: u32,
        /// Value requested by the opener.
        expected: u32,
    },

    /// I/O error during file operations.
    #[error("store meta I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreMetaError> for tessera_core::Error {
    fn from(err: StoreMetaError) -> Self {
        match err {
            StoreMetaError::Io(e) => tessera_core::Error::IoError(e),
            other => tessera_core::Error::IncompatibleFormat(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip() {
        let meta = StoreMeta::current(3, 1024);
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), STORE_META_SIZE);
        assert_eq!(StoreMeta::from_bytes(&bytes).unwrap(), meta);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = StoreMeta::current(1, 16).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            StoreMeta::from_bytes(&bytes),
            Err(StoreMetaError::InvalidMagic)
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = StoreMeta::current(1, 16).to_bytes();
        bytes[9] ^= 0xFF;
        assert!(matches!(
            StoreMeta::from_bytes(&bytes),
            Err(StoreMetaError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            StoreMeta::from_bytes(&[0u8; 5]),
            Err(StoreMetaError::TooShort { .. })
        ));
    }

    #[test]
    fn test_compatibility_checks_each_field() {
        let base = StoreMeta::current(2, 64);
        assert!(base.check_compatible(&base).is_ok());

        let schema = StoreMeta::current(3, 64);
        let err = base.check_compatible(&schema).unwrap_err();
        assert!(matches!(err, StoreMetaError::Mismatch { field: "schema_version", .. }));

        let per_segment = StoreMeta::current(2, 128);
        let err = base.check_compatible(&per_segment).unwrap_err();
        assert!(matches!(
            err,
            StoreMetaError::Mismatch { field: "elements_per_segment", .. }
        ));

        let mut old = base;
        old.format_version = 0;
        assert!(old.check_compatible(&base).is_err());
    }

    #[test]
    fn test_converts_to_incompatible_format() {
        let err: tessera_core::Error = StoreMetaError::InvalidMagic.into();
        assert!(matches!(err, tessera_core::Error::IncompatibleFormat(_)));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempdir().unwrap();
        assert!(StoreMeta::read_from_file(dir.path(), "concept-").unwrap().is_none());

        let meta = StoreMeta::current(1, 32);
        meta.write_to_file(dir.path(), "concept-").unwrap();
        assert!(dir.path().join("concept-format.meta").exists());

        let loaded = StoreMeta::read_from_file(dir.path(), "concept-")
            .unwrap()
            .expect("should exist");
        assert_eq!(loaded, meta);
    }
}
