//! Tessera - bitemporal, path-branching terminology store
//!
//! Components (concepts, semantics) keep their full version history. Every
//! version carries a stamp: status, time, author, module and path. Paths
//! branch from other paths at a point in time, so a question like "what did
//! this concept look like on the release branch last March" is answered by
//! resolving stamps against a [`StampCoordinate`].
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{
//!     ComponentKind, Database, Stamp, StampCoordinate, StampPosition, Status, Uuid, Version,
//! };
//!
//! let db = Database::open("./terminology")?;
//! let main = db.nid_or_assign(Uuid::new_v4())?;
//! db.add_path(main, vec![])?;
//!
//! let concept = db.nid_or_assign(Uuid::new_v4())?;
//! let stamp = db.mint_stamp(Stamp::new(Status::Active, 100, main, main, main));
//! let version = Version::new(stamp, b"fields".to_vec());
//! db.write_version(ComponentKind::Concept, concept, version)?;
//!
//! let now = StampCoordinate::new(StampPosition::latest_on(main));
//! let latest = db.latest(ComponentKind::Concept, concept, &now)?;
//! db.checkpoint()?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: identities, stamps, chronologies, errors
//! - `tessera-storage`: UUID ↔ NID maps and sequence allocation
//! - `tessera-durability`: record, segment and snapshot file formats
//! - `tessera-concurrency`: the CAS-merge slot store
//! - `tessera-engine`: stamp authority, paths, resolvers and [`Database`]

pub use tessera_core::{
    Chronology, Error, Nid, Precedence, Result, Sequence, Stamp, StampCoordinate, StampPosition,
    StampSequence, Stamped, Status, Time, Uuid, Version, LATEST,
};
pub use tessera_engine::{
    CheckpointSummary, ComponentKind, Database, IdentifierBackend, Latest, PathResolver,
    RelativePosition, TesseraConfig,
};
