//! On-disk formats
//!
//! - `record`: self-length-prefixed, CRC-protected records
//! - `segment`: segment file header
//! - `store_meta`: per-store format sidecar

pub mod record;
pub mod segment;
pub mod store_meta;

pub use record::{
    scan_records, Record, RecordError, RecordScan, ScanStop, ScannedRecord, RECORD_OVERHEAD,
};
pub use segment::{SegmentHeader, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC};
pub use store_meta::{StoreMeta, StoreMetaError, STORE_FORMAT_VERSION};
