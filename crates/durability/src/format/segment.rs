//! Segment file header.
//!
//! # Segment Header Format (16 bytes)
//!
//! ```text
//! ┌────────────────┬────────────────┬──────────────────────────┐
//! │ Magic (4)      │ Version (4)    │ Segment Index (8)        │
//! │ "TSEG"         │ u32 LE         │ u64 LE                   │
//! └────────────────┴────────────────┴──────────────────────────┘
//! ```

use byteorder::{ByteOrder, LittleEndian};

use super::store_meta::STORE_FORMAT_VERSION;

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"TSEG";

/// Size of the segment header in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Header written at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes
    pub magic: [u8; 4],
    /// Layout version
    pub format_version: u32,
    /// Index of the segment within its store
    pub segment_index: u64,
}

impl SegmentHeader {
    /// Header for a segment written by this build
    pub fn new(segment_index: u64) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: STORE_FORMAT_VERSION,
            segment_index,
        }
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut bytes[4..8], self.format_version);
        LittleEndian::write_u64(&mut bytes[8..16], self.segment_index);
        bytes
    }

    /// Parse a header, `None` if the data is too short
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SEGMENT_HEADER_SIZE {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Some(SegmentHeader {
            magic,
            format_version: LittleEndian::read_u32(&bytes[4..8]),
            segment_index: LittleEndian::read_u64(&bytes[8..16]),
        })
    }

    /// Magic and version match this build
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC && self.format_version == STORE_FORMAT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_header_roundtrip() {
        let header = SegmentHeader::new(12);
        let parsed = SegmentHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_segment_header_invalid_magic() {
        let mut bytes = SegmentHeader::new(1).to_bytes();
        bytes[0] = b'X';
        assert!(!SegmentHeader::from_bytes(&bytes).unwrap().is_valid());
    }

    #[test]
    fn test_segment_header_short() {
        assert!(SegmentHeader::from_bytes(&[0u8; 8]).is_none());
    }
}
