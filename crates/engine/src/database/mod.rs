//! Database: the composition root
//!
//! `Database` wires the identifier map, per-type sequence allocators, the
//! stamp authority, the path registry, one slot store per component type
//! and the resolver cache into one handle.
//!
//! # Directory layout
//!
//! ```text
//! <dir>/tessera.toml                 configuration
//! <dir>/tables/identifiers.snap      UUID -> NID
//! <dir>/tables/concept-sequences.snap
//! <dir>/tables/semantic-sequences.snap
//! <dir>/tables/stamps.snap           stamp sequence -> stamp
//! <dir>/tables/paths.snap            path -> origins
//! <dir>/concepts/concept-<n>.seg     concept chronologies
//! <dir>/semantics/semantic-<n>.seg   semantic chronologies
//! ```
//!
//! Nothing reaches disk until [`Database::checkpoint`].

pub mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use tessera_concurrency::SlotStore;
use tessera_core::{
    Chronology, Error, Nid, Result, Sequence, Stamp, StampCoordinate, StampPosition,
    StampSequence, Uuid, Version,
};
use tessera_durability::{read_table, write_table};
use tessera_storage::{
    ConcurrentIdentifierMap, IdentifierMap, ProbeIdentifierMap, SequenceAllocator,
};

use crate::authority::{StampAuthority, StampService};
use crate::paths::{PathRegistry, PathService};
use crate::resolver::{Latest, PathResolver, ResolverCache};

pub use config::{
    IdentifierBackend, IdentifierConfig, ResolverConfig, TesseraConfig, CONFIG_FILE_NAME,
};

const TABLES_DIR: &str = "tables";
const IDENTIFIERS_TABLE: &str = "identifiers.snap";
const STAMPS_TABLE: &str = "stamps.snap";
const PATHS_TABLE: &str = "paths.snap";

/// Kind of component stored in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Concepts
    Concept,
    /// Semantics (descriptions, relationships, refset members)
    Semantic,
}

impl ComponentKind {
    fn name(self) -> &'static str {
        match self {
            ComponentKind::Concept => "concept",
            ComponentKind::Semantic => "semantic",
        }
    }

    fn store_dir(self) -> &'static str {
        match self {
            ComponentKind::Concept => "concepts",
            ComponentKind::Semantic => "semantics",
        }
    }
}

/// What a checkpoint wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    /// Rows across all table snapshots
    pub table_rows: u64,
    /// Segment files rewritten
    pub segments: usize,
    /// Chronology records in those segments
    pub records: usize,
}

struct ComponentStore {
    sequences: SequenceAllocator,
    chronologies: SlotStore<Chronology>,
}

/// Handle to an open Tessera database
pub struct Database {
    dir: Option<PathBuf>,
    config: TesseraConfig,
    identifiers: Arc<dyn IdentifierMap>,
    stamps: Arc<StampAuthority>,
    paths: Arc<PathRegistry>,
    concepts: ComponentStore,
    semantics: ComponentStore,
    resolvers: ResolverCache,
    checkpoint_lock: Mutex<()>,
}

/// Merge function for every chronology store
fn merge_chronologies(
    existing: &Chronology,
    incoming: &Chronology,
    seq: Sequence,
) -> Result<Chronology> {
    if existing.nid != incoming.nid {
        warn!(
            sequence = seq.get(),
            existing = %existing.nid,
            incoming = %incoming.nid,
            "chronology written to a slot owned by another component"
        );
        return Err(Error::SlotOwnerMismatch {
            sequence: seq,
            owner: existing.nid,
            incoming: incoming.nid,
        });
    }
    Ok(Chronology::merge(existing, incoming))
}

impl Database {
    /// Open (or create) the database in `dir`.
    ///
    /// Writes a default `tessera.toml` if there is none, restores the
    /// identity tables and loads every segment file. Records whose sequence
    /// the restored tables do not assign are dropped.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a bad configuration file
    /// - `IncompatibleFormat` for files written with another layout
    /// - `IoError` when the directory cannot be read or created
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        TesseraConfig::write_default_if_missing(&config_path)?;
        let config = TesseraConfig::from_file(&config_path)?;

        let db = Self::build(Some(dir.to_path_buf()), config)?;
        db.load_tables()?;
        let concepts = db.initialize_store(ComponentKind::Concept)?;
        let semantics = db.initialize_store(ComponentKind::Semantic)?;

        info!(
            dir = %dir.display(),
            identifiers = db.identifiers.len(),
            stamps = db.stamps.len(),
            paths = db.paths.len(),
            concepts,
            semantics,
            "database opened"
        );
        Ok(db)
    }

    /// Database that never touches disk
    pub fn in_memory(config: TesseraConfig) -> Result<Self> {
        config.validate()?;
        Self::build(None, config)
    }

    fn build(dir: Option<PathBuf>, config: TesseraConfig) -> Result<Self> {
        let identifiers: Arc<dyn IdentifierMap> = match config.identifiers.backend {
            IdentifierBackend::Probe => Arc::new(ProbeIdentifierMap::new(
                config.identifiers.probe_map(),
                config.identifiers.reverse_cache_capacity,
            )?),
            IdentifierBackend::Concurrent => Arc::new(ConcurrentIdentifierMap::new(
                config.identifiers.reverse_cache_capacity,
            )),
        };

        let stamps = Arc::new(StampAuthority::new());
        let paths = Arc::new(PathRegistry::new());
        let resolvers = ResolverCache::new(
            Arc::clone(&paths) as Arc<dyn PathService>,
            Arc::clone(&stamps) as Arc<dyn StampService>,
            config.resolver.strict_equal_time,
        );

        let concepts = Self::component_store(dir.as_deref(), ComponentKind::Concept, &config)?;
        let semantics = Self::component_store(dir.as_deref(), ComponentKind::Semantic, &config)?;

        Ok(Database {
            dir,
            config,
            identifiers,
            stamps,
            paths,
            concepts,
            semantics,
            resolvers,
            checkpoint_lock: Mutex::new(()),
        })
    }

    fn component_store(
        dir: Option<&Path>,
        kind: ComponentKind,
        config: &TesseraConfig,
    ) -> Result<ComponentStore> {
        let chronologies = match dir {
            Some(dir) => SlotStore::persistent(
                dir.join(kind.store_dir()),
                &format!("{}-", kind.name()),
                config.slots.clone(),
                merge_chronologies,
            )?,
            None => SlotStore::in_memory(config.slots.clone(), merge_chronologies)?,
        };
        Ok(ComponentStore {
            sequences: SequenceAllocator::new(),
            chronologies,
        })
    }

    fn initialize_store(&self, kind: ComponentKind) -> Result<usize> {
        let component = self.component(kind);
        component
            .chronologies
            .initialize_retaining(|seq| component.sequences.nid_for(seq).is_some())
    }

    fn component(&self, kind: ComponentKind) -> &ComponentStore {
        match kind {
            ComponentKind::Concept => &self.concepts,
            ComponentKind::Semantic => &self.semantics,
        }
    }

    /// Directory backing the database, `None` when in memory
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Active configuration
    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// The identifier map
    pub fn identifiers(&self) -> &dyn IdentifierMap {
        self.identifiers.as_ref()
    }

    /// NID of `uuid`, if assigned
    pub fn nid(&self, uuid: &Uuid) -> Option<Nid> {
        self.identifiers.get(uuid)
    }

    /// NID of `uuid`, assigning one on first reference.
    ///
    /// # Errors
    ///
    /// `Exhausted` when no NID is left to assign.
    pub fn nid_or_assign(&self, uuid: Uuid) -> Result<Nid> {
        self.identifiers.get_or_assign(uuid)
    }

    /// One NID shared by every UUID in `uuids`.
    ///
    /// # Errors
    ///
    /// `IdentityConflict` when the UUIDs are already bound to different NIDs.
    pub fn nid_for_all(&self, uuids: &[Uuid]) -> Result<Nid> {
        self.identifiers.get_or_assign_all(uuids)
    }

    /// UUIDs bound to `nid`
    pub fn uuids(&self, nid: Nid) -> Vec<Uuid> {
        self.identifiers.uuids_for(nid)
    }

    /// Sequence of `nid` within `kind`'s store, if it has one
    pub fn sequence(&self, kind: ComponentKind, nid: Nid) -> Option<Sequence> {
        self.component(kind).sequences.get(nid)
    }

    // ========================================================================
    // Stamps and paths
    // ========================================================================

    /// Sequence for `stamp`, minting it on first sight
    pub fn mint_stamp(&self, stamp: Stamp) -> StampSequence {
        self.stamps.mint(stamp)
    }

    /// Stamp minted as `seq`
    pub fn stamp(&self, seq: StampSequence) -> Option<Stamp> {
        self.stamps.stamp(seq)
    }

    /// Declare a path and its origins.
    ///
    /// Cached resolvers are dropped so later queries see the new path.
    pub fn add_path(&self, path: Nid, origins: Vec<StampPosition>) -> Result<()> {
        let known = self.paths.contains(path);
        self.paths.add_path(path, origins)?;
        if !known {
            self.resolvers.invalidate();
        }
        Ok(())
    }

    /// Declared origins of `path`
    pub fn path_origins(&self, path: Nid) -> Option<Vec<StampPosition>> {
        self.paths.origins(path)
    }

    // ========================================================================
    // Chronologies
    // ========================================================================

    /// Merge `chronology` into `kind`'s store, returning its sequence.
    ///
    /// # Errors
    ///
    /// `SlotOwnerMismatch` if the slot holds another component's history,
    /// plus any error of [`SlotStore::put`].
    pub fn write(&self, kind: ComponentKind, chronology: Chronology) -> Result<Sequence> {
        let component = self.component(kind);
        let seq = component.sequences.get_or_assign(chronology.nid)?;
        component.chronologies.put(seq, chronology)?;
        Ok(seq)
    }

    /// Append one version to the chronology of `nid`
    pub fn write_version(
        &self,
        kind: ComponentKind,
        nid: Nid,
        version: Version,
    ) -> Result<Sequence> {
        self.write(kind, Chronology::with_version(nid, version))
    }

    /// Merge a concept chronology
    pub fn put_concept(&self, chronology: Chronology) -> Result<Sequence> {
        self.write(ComponentKind::Concept, chronology)
    }

    /// Merge a semantic chronology
    pub fn put_semantic(&self, chronology: Chronology) -> Result<Sequence> {
        self.write(ComponentKind::Semantic, chronology)
    }

    /// Chronology of `nid` within `kind`
    pub fn chronology(&self, kind: ComponentKind, nid: Nid) -> Result<Option<Arc<Chronology>>> {
        let component = self.component(kind);
        match component.sequences.get(nid) {
            Some(seq) => component.chronologies.get(seq),
            None => Ok(None),
        }
    }

    /// Concept chronology for `uuid`
    pub fn concept(&self, uuid: &Uuid) -> Result<Option<Arc<Chronology>>> {
        match self.nid(uuid) {
            Some(nid) => self.chronology(ComponentKind::Concept, nid),
            None => Ok(None),
        }
    }

    /// Semantic chronology for `uuid`
    pub fn semantic(&self, uuid: &Uuid) -> Result<Option<Arc<Chronology>>> {
        match self.nid(uuid) {
            Some(nid) => self.chronology(ComponentKind::Semantic, nid),
            None => Ok(None),
        }
    }

    /// Number of chronologies stored for `kind`
    pub fn count(&self, kind: ComponentKind) -> usize {
        self.component(kind).chronologies.len()
    }

    // ========================================================================
    // Coordinate queries
    // ========================================================================

    /// Resolver for `coordinate`, shared with every other caller
    pub fn resolver(&self, coordinate: &StampCoordinate) -> Result<Arc<PathResolver>> {
        self.resolvers.get(coordinate)
    }

    /// Drop every cached resolver
    pub fn invalidate_resolvers(&self) {
        self.resolvers.invalidate();
    }

    /// Latest versions of `nid` visible from `coordinate`, honouring the
    /// coordinate's allowed states
    pub fn latest(
        &self,
        kind: ComponentKind,
        nid: Nid,
        coordinate: &StampCoordinate,
    ) -> Result<Option<Latest<Version>>> {
        let Some(chronology) = self.chronology(kind, nid)? else {
            return Ok(None);
        };
        let resolver = self.resolver(coordinate)?;
        Ok(resolver.latest_visible(&chronology)?.map(|latest| latest.cloned()))
    }

    /// Latest active versions of `nid`; `None` if it is retired
    pub fn latest_active(
        &self,
        kind: ComponentKind,
        nid: Nid,
        coordinate: &StampCoordinate,
    ) -> Result<Option<Latest<Version>>> {
        let Some(chronology) = self.chronology(kind, nid)? else {
            return Ok(None);
        };
        let resolver = self.resolver(coordinate)?;
        Ok(resolver
            .latest_active_versions(&chronology)?
            .map(|latest| latest.cloned()))
    }

    /// Latest concept versions for `uuid`
    pub fn latest_concept(
        &self,
        uuid: &Uuid,
        coordinate: &StampCoordinate,
    ) -> Result<Option<Latest<Version>>> {
        match self.nid(uuid) {
            Some(nid) => self.latest(ComponentKind::Concept, nid, coordinate),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write every dirty segment, then every table snapshot.
    ///
    /// A record reaches a segment only after its NID, sequence and stamps
    /// were assigned, so the tables written afterwards cover every record.
    /// Records from a checkpoint that died between the two steps have no
    /// sequence in the tables and are dropped on open. In-memory databases
    /// write nothing.
    pub fn checkpoint(&self) -> Result<CheckpointSummary> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(CheckpointSummary::default());
        };
        let _guard = self.checkpoint_lock.lock();
        let tables = dir.join(TABLES_DIR);

        let mut summary = CheckpointSummary::default();
        for kind in [ComponentKind::Concept, ComponentKind::Semantic] {
            let written = self.component(kind).chronologies.write()?;
            summary.segments += written.segments;
            summary.records += written.records;
        }

        let identities = self.identifiers.entries();
        summary.table_rows += save_rows(&tables.join(IDENTIFIERS_TABLE), identities)?;
        for kind in [ComponentKind::Concept, ComponentKind::Semantic] {
            let rows = self.component(kind).sequences.entries();
            summary.table_rows += save_rows(&tables.join(sequences_table(kind)), rows)?;
        }
        summary.table_rows += save_rows(&tables.join(STAMPS_TABLE), self.stamps.entries())?;
        summary.table_rows += save_rows(&tables.join(PATHS_TABLE), self.paths.entries())?;

        info!(
            dir = %dir.display(),
            table_rows = summary.table_rows,
            segments = summary.segments,
            records = summary.records,
            "checkpoint complete"
        );
        Ok(summary)
    }

    fn load_tables(&self) -> Result<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(());
        };
        let tables = dir.join(TABLES_DIR);

        let identities: Vec<(Uuid, Nid)> = load_rows(&tables.join(IDENTIFIERS_TABLE))?;
        self.identifiers.begin_bulk_load();
        let restored = identities
            .into_iter()
            .try_for_each(|(uuid, nid)| self.identifiers.put(uuid, nid));
        self.identifiers.end_bulk_load();
        restored?;

        for kind in [ComponentKind::Concept, ComponentKind::Semantic] {
            let rows: Vec<(Nid, Sequence)> = load_rows(&tables.join(sequences_table(kind)))?;
            for (nid, seq) in rows {
                self.component(kind).sequences.put(nid, seq)?;
            }
        }

        let stamps: Vec<(StampSequence, Stamp)> = load_rows(&tables.join(STAMPS_TABLE))?;
        for (seq, stamp) in stamps {
            self.stamps.restore(seq, stamp)?;
        }

        let paths: Vec<(Nid, Vec<StampPosition>)> = load_rows(&tables.join(PATHS_TABLE))?;
        for (path, origins) in paths {
            self.paths.add_path(path, origins)?;
        }
        Ok(())
    }
}

fn sequences_table(kind: ComponentKind) -> String {
    format!("{}-sequences.snap", kind.name())
}

fn save_rows<R: Serialize>(path: &Path, rows: Vec<R>) -> Result<u64> {
    let encoded = rows
        .iter()
        .map(bincode::serialize)
        .collect::<std::result::Result<Vec<Vec<u8>>, _>>()?;
    Ok(write_table(path, encoded.iter().map(Vec::as_slice))?)
}

fn load_rows<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>> {
    let Some(rows) = read_table(path)? else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| bincode::deserialize(row).map_err(Into::into))
        .collect()
}
