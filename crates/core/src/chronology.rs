//! Chronologies: append-only version histories
//!
//! A [`Chronology`] holds every [`Version`] ever written for one component.
//! Versions are never edited or removed; retiring a component means
//! appending a version whose stamp carries an inactive status.
//!
//! Two writers may each hold a partial history of the same component.
//! [`Chronology::merge`] folds them into one: the union of versions keyed
//! by stamp, ordered by stamp sequence. Merging is commutative, associative
//! and idempotent, which is what the slot store's CAS loop relies on.

use crate::types::{Nid, StampSequence};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Anything carrying the stamp it was written under
pub trait Stamped {
    /// Stamp this value was written under
    fn stamp(&self) -> StampSequence;
}

/// One stamped snapshot of a component's fields.
///
/// Field payloads are opaque to the core; component providers encode
/// their own fields into `data`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Stamp the version was written under
    pub stamp: StampSequence,
    /// Encoded field values
    pub data: Vec<u8>,
}

impl Version {
    /// Create a version
    pub fn new(stamp: StampSequence, data: impl Into<Vec<u8>>) -> Self {
        Self {
            stamp,
            data: data.into(),
        }
    }
}

impl Stamped for Version {
    fn stamp(&self) -> StampSequence {
        self.stamp
    }
}

/// The full version history of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chronology {
    /// Component identity
    pub nid: Nid,
    /// Versions, ordered by stamp sequence, at most one per stamp
    versions: Vec<Version>,
}

impl Chronology {
    /// Create an empty chronology
    pub fn new(nid: Nid) -> Self {
        Self {
            nid,
            versions: Vec::new(),
        }
    }

    /// Create a chronology holding a single version
    pub fn with_version(nid: Nid, version: Version) -> Self {
        Self {
            nid,
            versions: vec![version],
        }
    }

    /// Append a version.
    ///
    /// A version whose stamp is already present is ignored: stamps are
    /// minted once, so the earlier copy is authoritative.
    pub fn push(&mut self, version: Version) {
        match self
            .versions
            .binary_search_by_key(&version.stamp, |v| v.stamp)
        {
            Ok(_) => {}
            Err(at) => self.versions.insert(at, version),
        }
    }

    /// All versions, ordered by stamp sequence
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Version written under `stamp`, if any
    pub fn version(&self, stamp: StampSequence) -> Option<&Version> {
        self.versions
            .binary_search_by_key(&stamp, |v| v.stamp)
            .ok()
            .map(|at| &self.versions[at])
    }

    /// Stamps of every version
    pub fn stamps(&self) -> impl Iterator<Item = StampSequence> + '_ {
        self.versions.iter().map(|v| v.stamp)
    }

    /// Number of versions
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the chronology has no versions
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Merge two histories of the same component into one.
    ///
    /// The result keeps `existing`'s copy of any version present in both.
    pub fn merge(existing: &Chronology, incoming: &Chronology) -> Chronology {
        debug_assert_eq!(existing.nid, incoming.nid, "merging different components");
        let mut merged = Vec::with_capacity(existing.versions.len() + incoming.versions.len());
        let mut a = existing.versions.iter().peekable();
        let mut b = incoming.versions.iter().peekable();
        loop {
            let order = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => x.stamp.cmp(&y.stamp),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            let next = match order {
                Ordering::Less => a.next(),
                Ordering::Greater => b.next(),
                Ordering::Equal => {
                    b.next();
                    a.next()
                }
            };
            if let Some(version) = next {
                merged.push(version.clone());
            }
        }
        Chronology {
            nid: existing.nid,
            versions: merged,
        }
    }
}
