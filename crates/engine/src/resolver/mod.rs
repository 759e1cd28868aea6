//! Path resolver: relative position of stamps under a coordinate
//!
//! A [`PathResolver`] is built for one [`StampCoordinate`]. Construction
//! walks the path-origin graph from the coordinate's destination and
//! records, for every reachable path, a [`Segment`]: the latest visible
//! time on that path and the set of segments it descends from.
//!
//! # Ordering rules
//!
//! - Stamps on one path are ordered by time.
//! - Stamps on different paths are ordered by ancestry: a stamp on a path
//!   descending from the other stamp's path comes after it. Under
//!   [`Precedence::Time`] differing times decide first.
//! - Stamps on paths with no ancestry between them contradict each other.
//! - A stamp whose path is unreachable, whose time is past its segment's
//!   end, or whose module is filtered out is unreachable.
//!
//! The segment map is immutable once built, so a resolver can be shared
//! across threads and cached per coordinate (see [`ResolverCache`]).

mod cache;
mod latest;
mod segment;

pub use cache::ResolverCache;
pub use latest::Latest;
pub use segment::{RelativePosition, Segment};

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use tessera_core::{
    Error, Nid, Precedence, Result, Stamp, StampCoordinate, StampPosition, StampSequence, Time,
};

use crate::authority::StampService;
use crate::paths::PathService;

/// Relative-position calculator for one coordinate
pub struct PathResolver {
    coordinate: StampCoordinate,
    segments: FxHashMap<Nid, Segment>,
    stamps: Arc<dyn StampService>,
    on_route: DashMap<StampSequence, bool>,
    strict_equal_time: bool,
}

impl PathResolver {
    /// Build the resolver for `coordinate`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the destination path is unknown, an origin names
    /// an unknown path, or the origin graph has a cycle.
    pub fn new(
        coordinate: StampCoordinate,
        paths: &dyn PathService,
        stamps: Arc<dyn StampService>,
    ) -> Result<Self> {
        let segments = build_segments(&coordinate.position, paths)?;
        debug!(
            destination = %coordinate.position,
            segments = segments.len(),
            "path resolver built"
        );
        Ok(PathResolver {
            coordinate,
            segments,
            stamps,
            on_route: DashMap::new(),
            strict_equal_time: false,
        })
    }

    /// Reject latest-set candidates that share path and time with a
    /// distinct stamp instead of keeping both
    pub fn with_strict_equal_time(mut self, strict: bool) -> Self {
        self.strict_equal_time = strict;
        self
    }

    /// Coordinate this resolver answers for
    pub fn coordinate(&self) -> &StampCoordinate {
        &self.coordinate
    }

    /// Segment for `path`, if reachable from the destination
    pub fn segment(&self, path: Nid) -> Option<&Segment> {
        self.segments.get(&path)
    }

    /// Every reachable segment, ordered by segment sequence
    pub fn segments(&self) -> Vec<&Segment> {
        let mut segments: Vec<&Segment> = self.segments.values().collect();
        segments.sort_by_key(|segment| segment.sequence);
        segments
    }

    /// Whether the stamp minted as `seq` is visible from the coordinate.
    ///
    /// Unknown sequences are not on route.
    pub fn on_route(&self, seq: StampSequence) -> bool {
        if let Some(known) = self.on_route.get(&seq) {
            return *known;
        }
        let Some(stamp) = self.stamps.stamp(seq) else {
            return false;
        };
        let visible = self.stamp_on_route(&stamp);
        self.on_route.insert(seq, visible);
        visible
    }

    /// Whether `stamp` is visible from the coordinate
    pub fn stamp_on_route(&self, stamp: &Stamp) -> bool {
        self.coordinate.allows_module(stamp.module)
            && self
                .segments
                .get(&stamp.path)
                .map_or(false, |segment| segment.contains_time(stamp.time))
    }

    /// Position of `s1` relative to `s2` under the coordinate's precedence
    pub fn relative_position(&self, s1: StampSequence, s2: StampSequence) -> RelativePosition {
        self.relative_position_under(s1, s2, self.coordinate.precedence)
    }

    /// Position of `s1` relative to `s2` under `precedence`
    pub fn relative_position_under(
        &self,
        s1: StampSequence,
        s2: StampSequence,
        precedence: Precedence,
    ) -> RelativePosition {
        if !self.on_route(s1) || !self.on_route(s2) {
            return RelativePosition::Unreachable;
        }
        if s1 == s2 {
            return RelativePosition::Equal;
        }
        match (self.stamps.stamp(s1), self.stamps.stamp(s2)) {
            (Some(a), Some(b)) => self.compare(&a, &b, precedence),
            _ => RelativePosition::Unreachable,
        }
    }

    /// Position of `a` relative to `b` for stamps not minted by the authority
    pub fn relative_position_of(&self, a: &Stamp, b: &Stamp) -> RelativePosition {
        if !self.stamp_on_route(a) || !self.stamp_on_route(b) {
            return RelativePosition::Unreachable;
        }
        self.compare(a, b, self.coordinate.precedence)
    }

    /// Compare two on-route stamps
    fn compare(&self, a: &Stamp, b: &Stamp, precedence: Precedence) -> RelativePosition {
        if a.path == b.path {
            return order_times(a.time, b.time);
        }
        if precedence == Precedence::Time && a.time != b.time {
            return order_times(a.time, b.time);
        }

        let (Some(first), Some(second)) = (self.segments.get(&a.path), self.segments.get(&b.path))
        else {
            return RelativePosition::Unreachable;
        };
        if first.descends_from(second) {
            RelativePosition::After
        } else if second.descends_from(first) {
            RelativePosition::Before
        } else {
            RelativePosition::Contradiction
        }
    }
}

fn order_times(a: Time, b: Time) -> RelativePosition {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => RelativePosition::Before,
        std::cmp::Ordering::Greater => RelativePosition::After,
        std::cmp::Ordering::Equal => RelativePosition::Equal,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current walk stack
    Open,
    /// Fully explored
    Closed,
}

/// Walk the origin graph from `destination` and derive its segments.
fn build_segments(
    destination: &StampPosition,
    paths: &dyn PathService,
) -> Result<FxHashMap<Nid, Segment>> {
    let root = destination.path;
    let root_origins = paths.origins(root).ok_or_else(|| {
        Error::configuration(format!("destination {root} is not a known path"))
    })?;

    // Depth-first with an explicit stack. Reaching an open path again is a
    // cycle; reaching a closed one is a merge point.
    let mut origins_of: FxHashMap<Nid, Vec<StampPosition>> = FxHashMap::default();
    let mut marks: FxHashMap<Nid, Mark> = FxHashMap::default();
    let mut post_order: Vec<Nid> = Vec::new();
    let mut stack: Vec<(Nid, usize)> = vec![(root, 0)];
    origins_of.insert(root, root_origins);
    marks.insert(root, Mark::Open);

    while let Some(&(path, next)) = stack.last() {
        let origins = &origins_of[&path];
        if next == origins.len() {
            stack.pop();
            marks.insert(path, Mark::Closed);
            post_order.push(path);
            continue;
        }
        let parent = origins[next].path;
        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }

        match marks.get(&parent) {
            Some(Mark::Closed) => {}
            Some(Mark::Open) => {
                let walk: Vec<String> = stack.iter().map(|(p, _)| p.to_string()).collect();
                return Err(Error::configuration(format!(
                    "path origins form a cycle: {} -> {parent}",
                    walk.join(" -> ")
                )));
            }
            None => {
                let parent_origins = paths.origins(parent).ok_or_else(|| {
                    Error::configuration(format!("{path} originates from unknown path {parent}"))
                })?;
                origins_of.insert(parent, parent_origins);
                marks.insert(parent, Mark::Open);
                stack.push((parent, 0));
            }
        }
    }

    // Reverse post-order puts every path ahead of its origins.
    let order: Vec<Nid> = post_order.into_iter().rev().collect();
    let sequence_of: FxHashMap<Nid, u32> = order
        .iter()
        .enumerate()
        .map(|(i, path)| (*path, i as u32))
        .collect();

    let mut end_times: FxHashMap<Nid, Time> = FxHashMap::default();
    end_times.insert(root, destination.time);
    for path in &order {
        let Some(&reach) = end_times.get(path) else {
            continue;
        };
        for origin in &origins_of[path] {
            let visible = origin.time.min(reach);
            end_times
                .entry(origin.path)
                .and_modify(|end| *end = (*end).max(visible))
                .or_insert(visible);
        }
    }

    let mut segments: FxHashMap<Nid, Segment> = FxHashMap::default();
    for path in order.iter().rev() {
        let sequence = sequence_of[path];
        let mut closure: FxHashSet<u32> = FxHashSet::default();
        closure.insert(sequence);
        for origin in &origins_of[path] {
            if let Some(parent) = segments.get(&origin.path) {
                closure.extend(parent.closure.iter().copied());
            }
        }
        segments.insert(
            *path,
            Segment {
                path: *path,
                sequence,
                end_time: end_times.get(path).copied().unwrap_or(destination.time),
                closure,
            },
        );
    }

    Ok(segments)
}
