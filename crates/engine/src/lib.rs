//! Database engine for Tessera
//!
//! This crate composes the lower layers into a database:
//! - StampAuthority: stamp minting and lookup
//! - PathRegistry: path ancestry metadata
//! - PathResolver: relative position and latest-version calculation for
//!   one stamp coordinate, plus a coordinate-keyed resolver cache
//! - Database: identity tables, component stores and checkpointing
//!
//! The engine is the only component that knows about:
//! - Which stores exist and where their files live
//! - Checkpoint ordering between tables and segments

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod authority;
pub mod database;
pub mod paths;
pub mod resolver;

pub use authority::{StampAuthority, StampService};
pub use database::{
    CheckpointSummary, ComponentKind, Database, IdentifierBackend, IdentifierConfig,
    ResolverConfig, TesseraConfig, CONFIG_FILE_NAME,
};
pub use paths::{PathRegistry, PathService};
pub use resolver::{Latest, PathResolver, RelativePosition, ResolverCache, Segment};
