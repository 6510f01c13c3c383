//! Property tests for scheduling scores and the dependency DAG.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use corral::services::priority_score;
use corral::services::DependencyResolver;

proptest! {
    /// Higher priority always yields a strictly lower (earlier) score.
    #[test]
    fn score_is_strictly_decreasing_in_priority(
        low in -10i8..10,
        aging in 0.0f64..100.0,
        deadline_offset in proptest::option::of(1i64..10_000),
    ) {
        let high = low + 1;
        let now = Utc::now();
        let deadline = deadline_offset.map(|secs| now + Duration::seconds(secs));
        let s_high = priority_score(high, deadline, aging, 2.0, now);
        let s_low = priority_score(low, deadline, aging, 2.0, now);
        prop_assert!(s_high < s_low);
    }

    /// More queue age never increases the score, and strictly decreases
    /// it for positive aging deltas.
    #[test]
    fn aging_is_strictly_monotone(
        priority in -10i8..=10,
        aging in 0.0f64..1000.0,
        delta in 0.001f64..100.0,
    ) {
        let now = Utc::now();
        let younger = priority_score(priority, None, aging, 2.0, now);
        let older = priority_score(priority, None, aging + delta, 2.0, now);
        prop_assert!(older < younger);
    }

    /// Overdue tasks outrank any priority/aging combination within the
    /// normal range.
    #[test]
    fn overdue_trumps_fresh_tasks(
        overdue_priority in -10i8..=10,
        fresh_priority in -10i8..=10,
        fresh_deadline_secs in 60i64..100_000,
        aging in 0.0f64..500.0,
    ) {
        let now = Utc::now();
        let overdue = priority_score(
            overdue_priority,
            Some(now - Duration::seconds(1)),
            0.0,
            2.0,
            now,
        );
        let fresh = priority_score(
            fresh_priority,
            Some(now + Duration::seconds(fresh_deadline_secs)),
            aging,
            2.0,
            now,
        );
        prop_assert!(overdue < fresh);
    }

    /// A forward chain of dependencies is acyclic; closing it back to
    /// the head is always detected.
    #[test]
    fn chains_are_acyclic_until_closed(len in 2usize..50) {
        let resolver = DependencyResolver::new();
        let nodes: Vec<Uuid> = (0..len).map(|_| Uuid::new_v4()).collect();
        // node[i] depends on node[i-1]
        let edges: Vec<(Uuid, Uuid)> = nodes.windows(2).map(|w| (w[1], w[0])).collect();

        prop_assert!(resolver.detect_cycle(&edges).is_none());
        prop_assert!(resolver.would_create_cycle(&edges, nodes[0], nodes[len - 1]));
        // An edge in the same direction as the chain is fine.
        prop_assert!(!resolver.would_create_cycle(&edges, nodes[len - 1], nodes[0]));
    }

    /// Random forward edges over an ordered node set never form a cycle
    /// (edges always point from later to earlier nodes).
    #[test]
    fn forward_edges_stay_acyclic(
        len in 2usize..30,
        edge_picks in proptest::collection::vec((0usize..100, 0usize..100), 0..60),
    ) {
        let resolver = DependencyResolver::new();
        let nodes: Vec<Uuid> = (0..len).map(|_| Uuid::new_v4()).collect();
        let edges: Vec<(Uuid, Uuid)> = edge_picks
            .into_iter()
            .map(|(a, b)| (a % len, b % len))
            .filter(|(a, b)| a != b)
            .map(|(a, b)| {
                let (hi, lo) = if a > b { (a, b) } else { (b, a) };
                (nodes[hi], nodes[lo])
            })
            .collect();

        prop_assert!(resolver.detect_cycle(&edges).is_none());
    }
}
