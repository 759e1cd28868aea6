//! Error types for Tessera
//!
//! This module defines the error taxonomy shared by every crate.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Absence is never an error: identifier, sequence and stamp lookups return
//! `Option`. Errors are reserved for conditions an operator must see
//! (corruption, misconfiguration, pathological contention).

use crate::types::{Nid, Sequence};
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Tessera store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error outside of a specific slot
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A stored record for one slot could not be decoded
    #[error("Corrupt record at sequence {sequence}: {reason}")]
    CorruptRecord {
        /// Sequence of the slot holding the record
        sequence: Sequence,
        /// What failed while decoding
        reason: String,
    },

    /// Path ancestry or coordinate is unusable (cycle, dangling origin,
    /// missing destination path)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The merge-then-CAS loop for one slot did not converge
    #[error("Merge retries exhausted for sequence {sequence} after {attempts} attempts")]
    RetryExhausted {
        /// Contended slot
        sequence: Sequence,
        /// Attempts made before giving up
        attempts: usize,
    },

    /// On-disk data was written by an incompatible format or schema
    #[error("Incompatible on-disk format: {0}")]
    IncompatibleFormat(String),

    /// A UUID is already bound to a different NID
    #[error("UUID {uuid} is bound to {existing}, refusing to rebind to {requested}")]
    IdentityConflict {
        /// UUID being rebound
        uuid: Uuid,
        /// NID already bound to the UUID
        existing: Nid,
        /// NID the caller asked for
        requested: Nid,
    },

    /// A value was merged into a slot that belongs to another component
    #[error("Sequence {sequence} belongs to {owner}, not {incoming}")]
    SlotOwnerMismatch {
        /// Slot written to
        sequence: Sequence,
        /// Component already in the slot
        owner: Nid,
        /// Component of the rejected value
        incoming: Nid,
    },

    /// Invalid argument or configuration value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An identifier counter has no values left to hand out
    #[error("{0} space exhausted")]
    Exhausted(&'static str),

    /// Distinct stamps with identical time and path in one history
    #[error("Malformed history: {0}")]
    MalformedHistory(String),
}

impl Error {
    /// Shorthand for [`Error::Configuration`]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Shorthand for [`Error::InvalidInput`]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Whether this error indicates database corruption rather than a
    /// caller mistake
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptRecord { .. } | Error::IncompatibleFormat(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::IoError(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
    }

    #[test]
    fn test_error_display_corrupt_record() {
        let err = Error::CorruptRecord {
            sequence: Sequence::new(42),
            reason: "checksum mismatch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Corrupt record"));
        assert!(msg.contains("42"));
        assert!(msg.contains("checksum mismatch"));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_error_display_retry_exhausted() {
        let err = Error::RetryExhausted {
            sequence: Sequence::new(7),
            attempts: 1000,
        };
        let msg = err.to_string();
        assert!(msg.contains("7"));
        assert!(msg.contains("1000"));
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_error_display_identity_conflict() {
        let uuid = Uuid::nil();
        let err = Error::IdentityConflict {
            uuid,
            existing: Nid::new(1),
            requested: Nid::new(2),
        };
        let msg = err.to_string();
        assert!(msg.contains(&uuid.to_string()));
    }

    #[test]
    fn test_error_display_exhausted() {
        let err = Error::Exhausted("NID");
        assert_eq!(err.to_string(), "NID space exhausted");
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
    }

    #[test]
    fn test_error_from_bincode() {
        let invalid_data = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String> = bincode::deserialize(&invalid_data).map_err(|e| e.into());
        assert!(matches!(result, Err(Error::SerializationError(_))));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(
            Error::configuration("cycle"),
            Error::Configuration(ref m) if m == "cycle"
        ));
        assert!(matches!(
            Error::invalid_input("bad"),
            Error::InvalidInput(ref m) if m == "bad"
        ));
    }
}
