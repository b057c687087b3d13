// tests/edge_types.rs

//! Blocking vs non-blocking edge semantics, driven by manual status
//! callbacks so each propagation step is observable.

use workgraph::engine::EventKind;
use workgraph::types::NodeStatus;
use workgraph_test_utils::builders::GraphBuilder;
use workgraph_test_utils::harness::EngineHarness;
use workgraph_test_utils::init_tracing;

fn ready_count(harness: &EngineHarness, node: &str) -> usize {
    harness
        .events_of_kind(EventKind::NodeReady)
        .iter()
        .filter(|e| e.node_id.as_deref() == Some(node))
        .count()
}

#[tokio::test]
async fn non_blocking_edge_triggers_target_immediately() {
    init_tracing();

    // c is gated by a blocking edge from b, plus a non-blocking edge from a.
    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("c", "echo c")
        .edge("b", "c")
        .non_blocking_edge("a", "c")
        .build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&[]).await.unwrap();

    // a completes: the single non-blocking latch is sufficient, the
    // unsatisfied blocking edge from b notwithstanding.
    harness.node_callback("a", "running", &run_id).await;
    harness.node_callback("a", "ran", &run_id).await;
    assert_eq!(harness.node_status("c").await, NodeStatus::Run);
}

#[tokio::test]
async fn blocking_target_waits_for_all_predecessors() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("c", "echo c")
        .edge("a", "c")
        .edge("b", "c")
        .build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&[]).await.unwrap();

    harness.node_callback("a", "running", &run_id).await;
    harness.node_callback("a", "ran", &run_id).await;
    assert_eq!(harness.node_status("c").await, NodeStatus::Idle);

    harness.node_callback("b", "running", &run_id).await;
    harness.node_callback("b", "ran", &run_id).await;
    assert_eq!(harness.node_status("c").await, NodeStatus::Run);

    // Entry cleared both incoming latches atomically.
    let snapshot = harness.snapshot().await;
    for link in snapshot.links {
        assert_eq!(link.status, workgraph::types::EdgeStatus::Idle);
    }
}

#[tokio::test]
async fn blocking_satisfaction_retriggers_completed_target() {
    init_tracing();

    // e first runs off the non-blocking edge from b, completes, then the
    // blocking edge from a latches and re-triggers it.
    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("e", "echo e")
        .edge("a", "e")
        .non_blocking_edge("b", "e")
        .build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&[]).await.unwrap();

    harness.node_callback("b", "running", &run_id).await;
    harness.node_callback("b", "ran", &run_id).await;
    assert_eq!(harness.node_status("e").await, NodeStatus::Run);

    harness.node_callback("e", "running", &run_id).await;
    harness.node_callback("e", "ran", &run_id).await;

    harness.node_callback("a", "running", &run_id).await;
    harness.node_callback("a", "ran", &run_id).await;
    assert_eq!(harness.node_status("e").await, NodeStatus::Run);
    assert_eq!(ready_count(&harness, "e"), 2);
}

#[tokio::test]
async fn non_blocking_retrigger_produces_repeated_starts() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("x", "echo x")
        .node("y", "echo y")
        .non_blocking_edge("x", "y")
        .build();
    let harness = EngineHarness::start(graph).await;

    // Both nodes are roots of the blocking subgraph (y has no blocking
    // in-edges), so both are seeded.
    let run_id = harness.start_run(&[]).await.unwrap();
    assert_eq!(ready_count(&harness, "y"), 1);

    harness.node_callback("y", "running", &run_id).await;
    harness.node_callback("y", "ran", &run_id).await;

    // x's completion latches the non-blocking edge: y re-enters run.
    harness.node_callback("x", "running", &run_id).await;
    harness.node_callback("x", "ran", &run_id).await;
    assert_eq!(ready_count(&harness, "y"), 2);

    // Queue a manual re-run of x while y is still pending, so the run stays
    // alive and the cycle repeats under the same run_id.
    harness
        .apply(workgraph::engine::Mutation::EditStatus {
            kind: workgraph::types::ElementKind::Node,
            id: "x".to_string(),
            status: "run".to_string(),
            run_id: Some(run_id.clone()),
        })
        .await
        .unwrap();
    harness.node_callback("y", "running", &run_id).await;
    harness.node_callback("y", "ran", &run_id).await;

    harness.node_callback("x", "running", &run_id).await;
    harness.node_callback("x", "ran", &run_id).await;
    assert_eq!(ready_count(&harness, "y"), 3);

    harness.node_callback("y", "running", &run_id).await;
    harness.node_callback("y", "ran", &run_id).await;

    // One completion despite the re-triggers.
    let started_y = harness
        .events_of_kind(EventKind::NodeStarted)
        .iter()
        .filter(|e| e.node_id.as_deref() == Some("y"))
        .count();
    assert_eq!(started_y, 3);
    assert_eq!(harness.events_of_kind(EventKind::RunComplete).len(), 1);
}

#[tokio::test]
async fn subset_ignores_edges_leaving_the_set() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .non_blocking_edge("a", "b")
        .build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&["a"]).await.unwrap();
    harness.node_callback("a", "running", &run_id).await;
    harness.node_callback("a", "ran", &run_id).await;

    assert_eq!(harness.node_status("b").await, NodeStatus::Idle);
    assert_eq!(ready_count(&harness, "b"), 0);
}

#[tokio::test]
async fn manual_edge_latch_feeds_readiness() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("c", "echo c")
        .edge("a", "c")
        .edge("b", "c")
        .build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&[]).await.unwrap();
    harness.node_callback("a", "running", &run_id).await;
    harness.node_callback("a", "ran", &run_id).await;

    // Latch the remaining blocking edge by hand: c becomes ready without b
    // ever running.
    harness
        .apply(workgraph::engine::Mutation::EditStatus {
            kind: workgraph::types::ElementKind::Edge,
            id: "b->c".to_string(),
            status: "to_run".to_string(),
            run_id: Some(run_id.clone()),
        })
        .await
        .unwrap();
    assert_eq!(harness.node_status("c").await, NodeStatus::Run);
}
