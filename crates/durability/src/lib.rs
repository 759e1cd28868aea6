//! Durability layer for Tessera
//!
//! This crate owns every byte Tessera puts on disk:
//! - Record format: self-length-prefixed records with CRC32
//! - Segment files: `<prefix><index>.<suffix>` files of records, rewritten
//!   atomically at checkpoint
//! - Store sidecar: format/schema version checked before a store loads
//! - Table snapshots: whole-file snapshots of the small identity tables
//!
//! Nothing here understands payloads; callers hand in encoded bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod fs;
pub mod segments;
pub mod snapshot;

pub use format::{
    Record, RecordError, ScanStop, ScannedRecord, SegmentHeader, StoreMeta, StoreMetaError,
    STORE_FORMAT_VERSION,
};
pub use fs::write_atomic;
pub use segments::{SegmentContents, SegmentError, SegmentLayout};
pub use snapshot::{read_table, write_table, SnapshotError};
