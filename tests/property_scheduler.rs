// tests/property_scheduler.rs

//! Property tests over randomly generated DAGs.
//!
//! Acyclicity is guaranteed by construction: node N may only receive edges
//! from nodes 0..N-1.

use std::collections::HashSet;

use proptest::prelude::*;

use workgraph::engine::EventKind;
use workgraph::types::NodeStatus;
use workgraph_test_utils::builders::GraphBuilder;
use workgraph_test_utils::harness::{EngineHarness, FakeRunner};
use workgraph_test_utils::init_tracing;

#[derive(Debug, Clone)]
struct DagCase {
    node_count: usize,
    /// (source index, target index) with source < target.
    edges: Vec<(usize, usize)>,
    failing: Vec<usize>,
    selection: Vec<usize>,
}

fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = DagCase> {
    (2..=max_nodes).prop_flat_map(|node_count| {
        let edges = proptest::collection::vec(
            (0..node_count, 0..node_count),
            0..node_count * 2,
        )
        .prop_map(move |raw| {
            let mut seen = HashSet::new();
            raw.into_iter()
                .filter_map(|(a, b)| {
                    let (lo, hi) = (a.min(b), a.max(b));
                    if lo == hi || !seen.insert((lo, hi)) {
                        None
                    } else {
                        Some((lo, hi))
                    }
                })
                .collect::<Vec<_>>()
        });
        let failing = proptest::collection::vec(0..node_count, 0..3);
        let selection = proptest::collection::vec(0..node_count, 0..node_count);
        (edges, failing, selection).prop_map(move |(edges, failing, selection)| DagCase {
            node_count,
            edges,
            failing,
            selection,
        })
    })
}

fn name(i: usize) -> String {
    format!("n{i}")
}

fn build(case: &DagCase) -> workgraph::graph::Graph {
    let mut builder = GraphBuilder::new();
    for i in 0..case.node_count {
        builder = builder.node(&name(i), &format!("echo {}", name(i)));
    }
    for (s, t) in &case.edges {
        builder = builder.edge(&name(*s), &name(*t));
    }
    builder.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every accepted full run terminates with exactly one RUN_COMPLETE and
    /// leaves no node in run/running.
    #[test]
    fn full_runs_terminate_exactly_once(case in dag_strategy(8)) {
        init_tracing();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = EngineHarness::start(build(&case)).await;
            let failing: Vec<String> = case.failing.iter().map(|i| name(*i)).collect();
            let failing_refs: Vec<&str> = failing.iter().map(|s| s.as_str()).collect();
            let runner = FakeRunner::spawn(&harness, &failing_refs);
            let mut rx = harness.subscribe();

            harness.start_run(&[]).await.unwrap();
            harness.wait_for(&mut rx, EventKind::RunComplete).await;

            let snapshot = harness.snapshot().await;
            for node in &snapshot.nodes {
                prop_assert!(
                    !node.status.is_active(),
                    "node {} still {:?} after completion",
                    node.id,
                    node.status
                );
            }
            prop_assert_eq!(harness.events_of_kind(EventKind::RunComplete).len(), 1);

            runner.stop();
            harness.shutdown().await;
            Ok(())
        })?;
    }

    /// Subset runs never touch nodes outside the allowed set.
    #[test]
    fn subset_runs_confine_propagation(case in dag_strategy(8)) {
        let selection: HashSet<usize> = case.selection.iter().cloned().collect();
        prop_assume!(!selection.is_empty());

        init_tracing();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let harness = EngineHarness::start(build(&case)).await;
            let runner = FakeRunner::spawn(&harness, &[]);
            let mut rx = harness.subscribe();

            let selected: Vec<String> = selection.iter().map(|i| name(*i)).collect();
            let selected_refs: Vec<&str> = selected.iter().map(|s| s.as_str()).collect();
            harness.start_run(&selected_refs).await.unwrap();
            harness.wait_for(&mut rx, EventKind::RunComplete).await;

            let snapshot = harness.snapshot().await;
            for node in &snapshot.nodes {
                if selection.contains(&node.id[1..].parse::<usize>().unwrap()) {
                    prop_assert!(!node.status.is_active());
                } else {
                    prop_assert_eq!(
                        node.status,
                        NodeStatus::Idle,
                        "node {} outside the run changed status",
                        &node.id
                    );
                }
            }

            runner.stop();
            harness.shutdown().await;
            Ok(())
        })?;
    }
}
