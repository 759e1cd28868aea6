//! Concurrent object storage for Tessera
//!
//! This crate implements the slot store:
//! - SlotStore: sequence-indexed values behind per-slot atomic references,
//!   written with merge-then-compare-and-swap
//! - Segment persistence: dirty segments flushed to files at checkpoint,
//!   loaded lazily on startup
//!
//! Writers never lock. A put that loses a race rereads the slot, merges
//! again and retries, so concurrent writes to one sequence are combined
//! rather than lost.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod slot;
pub mod store;

pub use config::SlotStoreConfig;
pub use store::{MergeFn, SlotStore, WriteSummary};
