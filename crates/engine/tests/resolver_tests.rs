//! Path resolver tests over real path topologies
//!
//! These tests exercise:
//!
//! 1. **Linear history** - one path, ordering by time
//! 2. **Branches** - a child path sees its parent up to the branch point
//! 3. **Siblings** - unrelated paths contradict, and both stay latest
//! 4. **Symmetry** - comparison is antisymmetric for arbitrary stamps
//!
//! ```bash
//! cargo test -p tessera-engine --test resolver_tests
//! ```

use proptest::prelude::*;
use std::sync::{Arc, Once};

use tessera_core::{
    Chronology, Nid, Precedence, Stamp, StampCoordinate, StampPosition, StampSequence, Status,
    Time, Version,
};
use tessera_engine::{PathRegistry, PathResolver, RelativePosition, StampAuthority};

// ============================================================================
// Test Helpers
// ============================================================================

const P1: Nid = Nid::new(1);
const P2: Nid = Nid::new(2);
const P3: Nid = Nid::new(3);
const P4: Nid = Nid::new(4);
const P5: Nid = Nid::new(5);

const AUTHOR: Nid = Nid::new(100);
const MODULE: Nid = Nid::new(200);

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// P1 is the root. P2 branches from P1 at 150. P3 and P4 both branch from
/// P1 at 150. P5 merges P3 and P4.
fn topology() -> PathRegistry {
    let paths = PathRegistry::new();
    paths.add_path(P1, vec![]).unwrap();
    paths.add_path(P2, vec![StampPosition::new(P1, 150)]).unwrap();
    paths.add_path(P3, vec![StampPosition::new(P1, 150)]).unwrap();
    paths.add_path(P4, vec![StampPosition::new(P1, 150)]).unwrap();
    paths
        .add_path(
            P5,
            vec![StampPosition::new(P3, 1_000), StampPosition::new(P4, 1_000)],
        )
        .unwrap();
    paths
}

struct World {
    paths: PathRegistry,
    stamps: Arc<StampAuthority>,
}

impl World {
    fn new() -> Self {
        init_tracing();
        World {
            paths: topology(),
            stamps: Arc::new(StampAuthority::new()),
        }
    }

    fn stamp(&self, time: Time, path: Nid) -> StampSequence {
        self.stamps
            .mint(Stamp::new(Status::Active, time, AUTHOR, MODULE, path))
    }

    fn resolver_at(&self, coordinate: StampCoordinate) -> PathResolver {
        PathResolver::new(coordinate, &self.paths, self.stamps.clone()).unwrap()
    }

    fn resolver(&self, path: Nid, time: Time) -> PathResolver {
        self.resolver_at(StampCoordinate::new(StampPosition::new(path, time)))
    }
}

// ============================================================================
// Linear history
// ============================================================================

mod linear {
    use super::*;

    #[test]
    fn test_earlier_stamp_is_before() {
        let world = World::new();
        let s1 = world.stamp(100, P1);
        let s2 = world.stamp(200, P1);

        let resolver = world.resolver(P1, 250);
        assert_eq!(resolver.relative_position(s1, s2), RelativePosition::Before);
        assert_eq!(resolver.relative_position(s2, s1), RelativePosition::After);
        assert_eq!(resolver.latest_stamps([s1, s2]).unwrap(), vec![s2]);
        assert_eq!(resolver.latest_stamps([s2, s1]).unwrap(), vec![s2]);
    }

    #[test]
    fn test_stamp_after_coordinate_is_unreachable() {
        let world = World::new();
        let s1 = world.stamp(100, P1);
        let late = world.stamp(300, P1);

        let resolver = world.resolver(P1, 250);
        assert!(!resolver.on_route(late));
        assert_eq!(resolver.relative_position(s1, late), RelativePosition::Unreachable);
        assert_eq!(resolver.latest_stamps([s1, late]).unwrap(), vec![s1]);
    }

    #[test]
    fn test_same_stamp_is_equal() {
        let world = World::new();
        let s1 = world.stamp(100, P1);
        let resolver = world.resolver(P1, 250);
        assert_eq!(resolver.relative_position(s1, s1), RelativePosition::Equal);
    }
}

// ============================================================================
// Branches
// ============================================================================

mod branches {
    use super::*;

    #[test]
    fn test_child_sees_parent_before_branch_point() {
        let world = World::new();
        let s1 = world.stamp(100, P1);
        let s3 = world.stamp(300, P2);

        let resolver = world.resolver(P2, 500);
        assert!(resolver.on_route(s1));
        assert!(resolver.on_route(s3));
        assert!(resolver.segment(P2).unwrap().descends_from(resolver.segment(P1).unwrap()));
        assert_eq!(resolver.relative_position(s3, s1), RelativePosition::After);
        assert_eq!(resolver.latest_stamps([s3, s1]).unwrap(), vec![s3]);
    }

    #[test]
    fn test_parent_after_branch_point_is_hidden() {
        let world = World::new();
        let parent_late = world.stamp(200, P1);
        let child = world.stamp(160, P2);

        let resolver = world.resolver(P2, 500);
        assert!(!resolver.on_route(parent_late));
        assert_eq!(resolver.latest_stamps([parent_late, child]).unwrap(), vec![child]);
    }

    #[test]
    fn test_parent_cannot_see_child() {
        let world = World::new();
        let child = world.stamp(300, P2);
        let resolver = world.resolver(P1, 1_000);
        assert!(resolver.segment(P2).is_none());
        assert!(!resolver.on_route(child));
    }

    #[test]
    fn test_time_precedence_orders_across_paths() {
        let world = World::new();
        let s4 = world.stamp(400, P3);
        let s5 = world.stamp(450, P4);

        let by_time = world.resolver_at(
            StampCoordinate::new(StampPosition::new(P5, 2_000)).with_precedence(Precedence::Time),
        );
        assert_eq!(by_time.relative_position(s4, s5), RelativePosition::Before);
        assert_eq!(by_time.latest_stamps([s4, s5]).unwrap(), vec![s5]);

        let by_path = world.resolver(P5, 2_000);
        assert_eq!(by_path.relative_position(s4, s5), RelativePosition::Contradiction);
    }

    #[test]
    fn test_module_filter_hides_other_modules() {
        let world = World::new();
        let visible = world.stamp(100, P1);
        let other = world
            .stamps
            .mint(Stamp::new(Status::Active, 200, AUTHOR, Nid::new(999), P1));

        let resolver = world.resolver_at(
            StampCoordinate::new(StampPosition::new(P1, 500)).with_modules([MODULE]),
        );
        assert!(resolver.on_route(visible));
        assert!(!resolver.on_route(other));
        assert_eq!(resolver.latest_stamps([visible, other]).unwrap(), vec![visible]);
    }
}

// ============================================================================
// Siblings and merges
// ============================================================================

mod siblings {
    use super::*;

    #[test]
    fn test_sibling_paths_contradict() {
        let world = World::new();
        let s4 = world.stamp(400, P3);
        let s5 = world.stamp(400, P4);

        let resolver = world.resolver(P5, 2_000);
        assert_eq!(resolver.relative_position(s4, s5), RelativePosition::Contradiction);
        assert_eq!(resolver.relative_position(s5, s4), RelativePosition::Contradiction);

        let latest = resolver.latest_stamps([s4, s5]).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.contains(&s4) && latest.contains(&s5));
    }

    #[test]
    fn test_common_ancestor_is_superseded_by_both_siblings() {
        let world = World::new();
        let root = world.stamp(100, P1);
        let s4 = world.stamp(400, P3);
        let s5 = world.stamp(400, P4);

        let resolver = world.resolver(P5, 2_000);
        let latest = resolver.latest_stamps([root, s4, s5]).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(!latest.contains(&root));
    }

    #[test]
    fn test_merge_path_supersedes_both_sides() {
        let world = World::new();
        let s4 = world.stamp(400, P3);
        let s5 = world.stamp(400, P4);
        let merged = world.stamp(1_500, P5);

        let resolver = world.resolver(P5, 2_000);
        assert_eq!(resolver.latest_stamps([s4, s5, merged]).unwrap(), vec![merged]);
    }

    #[test]
    fn test_shared_ancestor_segment_built_once() {
        let world = World::new();
        let resolver = world.resolver(P5, 2_000);
        let segments = resolver.segments();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].path, P5);
        assert_eq!(resolver.segment(P5).unwrap().sequence, 0);
        let root = resolver.segment(P1).unwrap();
        assert_eq!(root.end_time, 150);
        assert!(resolver.segment(P3).unwrap().descends_from(root));
        assert!(resolver.segment(P4).unwrap().descends_from(root));
    }

    #[test]
    fn test_latest_versions_report_contradiction() {
        let world = World::new();
        let s4 = world.stamp(400, P3);
        let s5 = world.stamp(400, P4);
        let mut chronology = Chronology::new(Nid::new(42));
        chronology.push(Version::new(s4, b"left".to_vec()));
        chronology.push(Version::new(s5, b"right".to_vec()));

        let resolver = world.resolver(P5, 2_000);
        let latest = resolver.latest_versions(&chronology).unwrap().unwrap();
        assert!(latest.is_contradicted());
        assert_eq!(latest.member_count(), 2);
    }
}

// ============================================================================
// Symmetry
// ============================================================================

mod symmetry {
    use super::*;

    fn arb_stamp() -> impl Strategy<Value = (Time, u32)> {
        (0i64..2_500, 1u32..=5)
    }

    proptest! {
        #[test]
        fn comparison_is_antisymmetric(a in arb_stamp(), b in arb_stamp(), dest in 1u32..=5) {
            let world = World::new();
            let s1 = world.stamp(a.0, Nid::new(a.1));
            let s2 = world.stamp(b.0, Nid::new(b.1));
            let resolver = world.resolver(Nid::new(dest), 2_000);

            let forward = resolver.relative_position(s1, s2);
            let backward = resolver.relative_position(s2, s1);
            prop_assert_eq!(forward, backward.reverse());
        }

        #[test]
        fn latest_set_never_holds_ordered_pairs(
            stamps in proptest::collection::vec(arb_stamp(), 1..12),
            dest in 1u32..=5,
        ) {
            let world = World::new();
            let minted: Vec<StampSequence> = stamps
                .iter()
                .map(|(time, path)| world.stamp(*time, Nid::new(*path)))
                .collect();
            let resolver = world.resolver(Nid::new(dest), 2_000);
            let latest = resolver.latest_stamps(minted.iter().copied()).unwrap();

            for a in &latest {
                prop_assert!(resolver.on_route(*a));
                for b in &latest {
                    if a != b {
                        let position = resolver.relative_position(*a, *b);
                        prop_assert!(
                            position != RelativePosition::Before
                                && position != RelativePosition::After
                        );
                    }
                }
            }
        }
    }
}
