//! Identity layer for Tessera
//!
//! This crate implements the in-memory identity structures:
//! - ProbeTable: prime-sized open-addressing table over 128-bit keys with
//!   FREE/FULL/REMOVED slot markers and double hashing
//! - ProbeMap: the table behind a sequence lock, with optimistic reads and
//!   water-mark driven grow/shrink rehashing
//! - IdentifierMap: UUID ↔ NID maps (probe-backed and DashMap-backed)
//! - SequenceAllocator: per-type dense NID ↔ sequence assignment
//!
//! # Concurrency
//!
//! - Reads never block on a healthy path: they validate a version stamp and
//!   only fall back to the writer mutex when a writer interfered.
//! - Writers serialize on one narrowly-scoped mutex per map.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod identity;
pub mod probe;
pub mod probe_map;
pub mod sequence;

pub use identity::{ConcurrentIdentifierMap, IdentifierMap, ProbeIdentifierMap};
pub use probe::{InsertOutcome, ProbeTable, SlotState, WideKey};
pub use probe_map::{ProbeMap, ProbeMapConfig};
pub use sequence::SequenceAllocator;
