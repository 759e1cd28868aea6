//! Segment files of one store
//!
//! A store's data lives in a directory of files named
//! `<prefix><index>.<suffix>`. Each file is a [`SegmentHeader`] followed
//! by records. Segments are always rewritten whole through
//! [`write_atomic`], so a crash leaves either the old or the new file; a
//! truncated tail can still appear if a file is damaged externally and is
//! dropped with a warning on read.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::format::{
    scan_records, Record, ScanStop, ScannedRecord, SegmentHeader, SEGMENT_HEADER_SIZE,
};
use crate::fs::write_atomic;

/// File naming and I/O for one store's segments
#[derive(Debug, Clone)]
pub struct SegmentLayout {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

/// Records read back from one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentContents {
    /// Records in file order, including ones whose checksum failed
    pub records: Vec<ScannedRecord>,
    /// Why reading stopped
    pub stop: ScanStop,
}

impl SegmentLayout {
    /// Layout for files `<dir>/<prefix><index>.<suffix>`
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        SegmentLayout {
            dir: dir.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Directory holding the segments
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shared file name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of segment `index`
    pub fn segment_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.prefix, index, self.suffix))
    }

    /// Indices of every segment present on disk, ascending.
    ///
    /// A missing directory has no segments.
    pub fn list_segments(&self) -> io::Result<Vec<u64>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let dot_suffix = format!(".{}", self.suffix);
        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(middle) = name
                .strip_prefix(self.prefix.as_str())
                .and_then(|rest| rest.strip_suffix(dot_suffix.as_str()))
            else {
                continue;
            };
            // Sidecars and temp files share the prefix but not the numeric middle.
            if let Ok(index) = middle.parse::<u64>() {
                segments.push(index);
            }
        }

        segments.sort_unstable();
        Ok(segments)
    }

    /// Replace segment `index` with `records`
    pub fn write_segment<'a, I>(&self, index: u64, records: I) -> io::Result<usize>
    where
        I: IntoIterator<Item = (u32, &'a [u8])>,
    {
        std::fs::create_dir_all(&self.dir)?;

        let mut buf = Vec::with_capacity(SEGMENT_HEADER_SIZE + 4096);
        buf.extend_from_slice(&SegmentHeader::new(index).to_bytes());
        let mut count = 0;
        for (key, payload) in records {
            Record::encode_into(key, payload, &mut buf);
            count += 1;
        }

        write_atomic(&self.segment_path(index), &buf)?;
        Ok(count)
    }

    /// Read every record of segment `index`
    pub fn read_segment(&self, index: u64) -> Result<SegmentContents, SegmentError> {
        let path = self.segment_path(index);
        let data = std::fs::read(&path)?;

        let header = SegmentHeader::from_bytes(&data).ok_or_else(|| SegmentError::InvalidHeader {
            path: path.clone(),
        })?;
        if !header.is_valid() {
            return Err(SegmentError::InvalidHeader { path });
        }
        if header.segment_index != index {
            return Err(SegmentError::IndexMismatch {
                path,
                found: header.segment_index,
            });
        }

        let scan = scan_records(&data[SEGMENT_HEADER_SIZE..]);
        match scan.stop {
            ScanStop::EndOfData => {}
            ScanStop::PartialRecord { offset } | ScanStop::Garbage { offset } => {
                warn!(
                    path = %path.display(),
                    offset = offset + SEGMENT_HEADER_SIZE,
                    discarded = data.len() - SEGMENT_HEADER_SIZE - offset,
                    "discarding trailing partial record"
                );
            }
        }

        Ok(SegmentContents {
            records: scan.records,
            stop: scan.stop,
        })
    }
}

/// Errors reading a segment file
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Header missing, wrong magic, or unknown version
    #[error("segment {path:?} has an invalid header")]
    InvalidHeader {
        /// Offending file
        path: PathBuf,
    },

    /// Header names a different segment than the file name
    #[error("segment {path:?} claims index {found}")]
    IndexMismatch {
        /// Offending file
        path: PathBuf,
        /// Index stored in the header
        found: u64,
    },

    /// I/O error
    #[error("segment I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SegmentError> for tessera_core::Error {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::Io(e) => tessera_core::Error::IoError(e),
            other => tessera_core::Error::IncompatibleFormat(other.to_string()),
        }
    }
}
