//! Stamps, positions and coordinates
//!
//! A [`Stamp`] is the immutable audit tuple attached to every version. A
//! [`StampPosition`] is a point on one path; a [`StampCoordinate`] adds the
//! filters that decide which versions are visible from that point.
//!
//! ## Time
//!
//! Times are milliseconds since the Unix epoch. [`LATEST`] stands for
//! "no upper bound" and is what a coordinate uses to see everything
//! written so far on a path.

use crate::types::{Nid, Status};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Milliseconds since Unix epoch
pub type Time = i64;

/// Unbounded time: a position at `LATEST` sees every version on its path
pub const LATEST: Time = i64::MAX;

/// Immutable (status, time, author, module, path) tuple.
///
/// Stamps are minted once by a stamp authority and identified by a
/// [`StampSequence`](crate::StampSequence) from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Lifecycle status of the stamped version
    pub status: Status,
    /// Commit time
    pub time: Time,
    /// Author concept
    pub author: Nid,
    /// Module concept
    pub module: Nid,
    /// Path (branch) concept
    pub path: Nid,
}

impl Stamp {
    /// Create a stamp
    pub fn new(status: Status, time: Time, author: Nid, module: Nid, path: Nid) -> Self {
        Self {
            status,
            time,
            author,
            module,
            path,
        }
    }

    /// Position of this stamp on its path
    pub fn position(&self) -> StampPosition {
        StampPosition::new(self.path, self.time)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {} author={} module={}]",
            self.status,
            self.position(),
            self.author,
            self.module
        )
    }
}

/// A point in time on one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StampPosition {
    /// Path concept
    pub path: Nid,
    /// Time on the path
    pub time: Time,
}

impl StampPosition {
    /// Create a position
    pub const fn new(path: Nid, time: Time) -> Self {
        Self { path, time }
    }

    /// Latest position on `path`
    pub const fn latest_on(path: Nid) -> Self {
        Self { path, time: LATEST }
    }
}

impl fmt::Display for StampPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.time == LATEST {
            return write!(f, "{}@latest", self.path);
        }
        match chrono::DateTime::from_timestamp_millis(self.time) {
            Some(at) => write!(f, "{}@{}", self.path, at.to_rfc3339()),
            None => write!(f, "{}@{}ms", self.path, self.time),
        }
    }
}

/// Which ordering wins when two stamps sit on different paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Precedence {
    /// Path ancestry decides; unrelated paths contradict
    #[default]
    Path,
    /// Raw time decides first; ties fall back to path ancestry
    Time,
}

/// Destination position plus the filters that define visibility.
///
/// Empty `modules` or `states` mean "allow all". Coordinates are plain
/// values and are used as cache keys for path resolvers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampCoordinate {
    /// Where the view is taken from
    pub position: StampPosition,
    /// Ordering policy across paths
    pub precedence: Precedence,
    /// Allowed modules (empty = all)
    pub modules: BTreeSet<Nid>,
    /// Allowed states (empty = all)
    pub states: BTreeSet<Status>,
}

impl StampCoordinate {
    /// Coordinate at `position` with path precedence and no filters
    pub fn new(position: StampPosition) -> Self {
        Self {
            position,
            precedence: Precedence::Path,
            modules: BTreeSet::new(),
            states: BTreeSet::new(),
        }
    }

    /// Replace the precedence policy
    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Restrict to the given modules
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = Nid>) -> Self {
        self.modules = modules.into_iter().collect();
        self
    }

    /// Restrict to the given states
    pub fn with_states(mut self, states: impl IntoIterator<Item = Status>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    /// Whether `module` passes the module filter
    #[inline]
    pub fn allows_module(&self, module: Nid) -> bool {
        self.modules.is_empty() || self.modules.contains(&module)
    }

    /// Whether `status` passes the state filter
    #[inline]
    pub fn allows_status(&self, status: Status) -> bool {
        self.states.is_empty() || self.states.contains(&status)
    }
}
