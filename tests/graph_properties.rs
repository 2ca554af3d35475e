//! Property tests for the dependency graph and classifier invariants.

use proptest::prelude::*;

use apiforge_core::{
    DependencyGraph, NodeAttrs, NodeContent, NodeKind, ParamLocation, Parameter,
    ParameterClassifier, RequestId,
};

fn graph_with_nodes(count: u32) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for i in 0..count {
        graph.add_node(
            NodeKind::Curl,
            NodeContent::Request(RequestId(i)),
            NodeAttrs::default(),
        );
    }
    graph
}

proptest! {
    /// The edge relation stays acyclic no matter which insertions are
    /// attempted: rejected edges leave no trace.
    #[test]
    fn graph_stays_acyclic(
        node_count in 2u32..12,
        edges in prop::collection::vec((0u32..12, 0u32..12), 0..40),
    ) {
        let mut graph = graph_with_nodes(node_count);
        for (from, to) in edges {
            let from = apiforge_core::NodeId(from % node_count);
            let to = apiforge_core::NodeId(to % node_count);
            // Errors (cycles, self-edges) are expected; the invariant is
            // that the graph never actually contains a cycle.
            let _ = graph.add_edge(from, to, format!("v{}-{}", from.0, to.0));
            prop_assert!(graph.detect_cycles().is_none());
        }
        // A complete (fully resolved) graph always sorts totally.
        prop_assert_eq!(graph.topological_sort().len(), graph.node_count());
    }

    /// Duplicate (from, to, label) insertions never add edges.
    #[test]
    fn duplicate_edges_are_idempotent(
        node_count in 2u32..8,
        from in 0u32..8,
        to in 0u32..8,
        repeats in 1usize..5,
    ) {
        let mut graph = graph_with_nodes(node_count);
        let from = apiforge_core::NodeId(from % node_count);
        let to = apiforge_core::NodeId(to % node_count);
        if from == to {
            return Ok(());
        }
        if graph.add_edge(from, to, "label").is_ok() {
            let baseline = graph.edge_count();
            for _ in 0..repeats {
                graph.add_edge(from, to, "label").unwrap();
            }
            prop_assert_eq!(graph.edge_count(), baseline);
        }
    }

    /// Heuristic classification always lands inside the enum with a
    /// confidence in [0, 1].
    #[test]
    fn classifier_confidence_bounded(
        name in "[a-z_]{1,12}",
        value in "[A-Za-z0-9._-]{0,40}",
    ) {
        if value.is_empty() {
            return Ok(());
        }
        let classifier = ParameterClassifier::default();
        let param = Parameter {
            name,
            value,
            location: ParamLocation::Query,
        };
        let stat = apiforge_core::ConsistencyStat {
            most_common_value: param.value.clone(),
            occurrences: 1,
            total_observations: 1,
            consistency: 1.0,
            occurrence_rate: 1.0,
        };
        let (_, confidence) = classifier.heuristic(&param, &stat);
        prop_assert!((0.0..=1.0).contains(&confidence));
    }
}
