//! Core types for Tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - Nid / Sequence / StampSequence: dense integer identities
//! - Status: lifecycle state of a version
//! - Stamp, StampPosition, StampCoordinate, Precedence: bitemporal addressing
//! - Chronology / Version: append-only component histories
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chronology;
pub mod error;
pub mod stamp;
pub mod types;

pub use chronology::{Chronology, Stamped, Version};
pub use error::{Error, Result};
pub use stamp::{Precedence, Stamp, StampCoordinate, StampPosition, Time, LATEST};
pub use types::{Nid, Sequence, StampSequence, Status};

/// Re-exported so downstream crates name the same UUID type
pub use uuid::Uuid;
