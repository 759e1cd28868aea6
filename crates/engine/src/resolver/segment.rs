//! Per-resolver path segments and comparison outcomes

use std::fmt;

use rustc_hash::FxHashSet;
use tessera_core::{Nid, Time};

/// Order of one stamp relative to another under a coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelativePosition {
    /// First stamp precedes the second
    Before,
    /// First stamp supersedes the second
    After,
    /// Same path and time
    Equal,
    /// Neither path is an ancestor of the other
    Contradiction,
    /// At least one stamp is not visible from the coordinate
    Unreachable,
}

impl RelativePosition {
    /// The outcome with the arguments swapped
    pub fn reverse(self) -> Self {
        match self {
            RelativePosition::Before => RelativePosition::After,
            RelativePosition::After => RelativePosition::Before,
            other => other,
        }
    }
}

impl fmt::Display for RelativePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelativePosition::Before => "before",
            RelativePosition::After => "after",
            RelativePosition::Equal => "equal",
            RelativePosition::Contradiction => "contradiction",
            RelativePosition::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

/// One path reachable from a resolver's destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Path this segment stands for
    pub path: Nid,
    /// Position in the walk; the destination is 0, ancestors are larger
    pub sequence: u32,
    /// Latest time on this path visible from the destination
    pub end_time: Time,
    /// This segment plus every ancestor segment
    pub closure: FxHashSet<u32>,
}

impl Segment {
    /// Whether `other` is this segment or one of its ancestors
    #[inline]
    pub fn descends_from(&self, other: &Segment) -> bool {
        self.closure.contains(&other.sequence)
    }

    /// Whether `time` on this path is visible
    #[inline]
    pub fn contains_time(&self, time: Time) -> bool {
        time <= self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_swaps_only_order() {
        assert_eq!(RelativePosition::Before.reverse(), RelativePosition::After);
        assert_eq!(RelativePosition::After.reverse(), RelativePosition::Before);
        for p in [
            RelativePosition::Equal,
            RelativePosition::Contradiction,
            RelativePosition::Unreachable,
        ] {
            assert_eq!(p.reverse(), p);
        }
    }

    #[test]
    fn test_descends_from_uses_closure() {
        let parent = Segment {
            path: Nid::new(1),
            sequence: 1,
            end_time: 150,
            closure: [1].into_iter().collect(),
        };
        let child = Segment {
            path: Nid::new(2),
            sequence: 0,
            end_time: 500,
            closure: [0, 1].into_iter().collect(),
        };
        assert!(child.descends_from(&parent));
        assert!(!parent.descends_from(&child));
        assert!(parent.contains_time(150));
        assert!(!parent.contains_time(151));
    }
}
