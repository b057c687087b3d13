// tests/run_scenarios.rs

//! End-to-end runs over the engine harness with a fake runner reporting
//! completions, covering linear pipelines, failure isolation, resume, and
//! subset runs.

use workgraph::engine::EventKind;
use workgraph::types::NodeStatus;
use workgraph_test_utils::builders::GraphBuilder;
use workgraph_test_utils::harness::{EngineHarness, FakeRunner};
use workgraph_test_utils::init_tracing;

#[tokio::test]
async fn linear_pipeline_completes_in_order() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("c", "echo c")
        .edge("a", "b")
        .edge("b", "c")
        .build();
    let harness = EngineHarness::start(graph).await;
    let runner = FakeRunner::spawn(&harness, &[]);
    let mut rx = harness.subscribe();

    let run_id = harness.start_run(&[]).await.unwrap();
    let complete = harness.wait_for(&mut rx, EventKind::RunComplete).await;
    assert_eq!(complete.run_id.as_deref(), Some(run_id.as_str()));

    assert_eq!(runner.executed(), vec!["a", "b", "c"]);
    for node in ["a", "b", "c"] {
        assert_eq!(harness.node_status(node).await, NodeStatus::Ran);
    }

    // Per-node lifecycle order: ready before started before finished, and
    // b's ready only after a finished.
    let events = harness.events();
    let seq_of = |kind: EventKind, node: &str| {
        events
            .iter()
            .find(|e| e.kind == kind && e.node_id.as_deref() == Some(node))
            .unwrap_or_else(|| panic!("missing {kind:?} for {node}"))
            .seq
    };
    for node in ["a", "b", "c"] {
        assert!(seq_of(EventKind::NodeReady, node) < seq_of(EventKind::NodeStarted, node));
        assert!(seq_of(EventKind::NodeStarted, node) < seq_of(EventKind::NodeFinished, node));
    }
    assert!(seq_of(EventKind::NodeFinished, "a") < seq_of(EventKind::NodeReady, "b"));
    assert!(seq_of(EventKind::NodeFinished, "b") < seq_of(EventKind::NodeReady, "c"));

    let completes = harness.events_of_kind(EventKind::RunComplete);
    assert_eq!(completes.len(), 1);
    assert!(events.iter().all(|e| e.seq <= completes[0].seq || e.kind != EventKind::NodeFinished));

    runner.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn failure_isolates_one_branch() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("c", "false")
        .node("d", "echo d")
        .edge("a", "b")
        .edge("a", "c")
        .edge("c", "d")
        .build();
    let harness = EngineHarness::start(graph).await;
    let runner = FakeRunner::spawn(&harness, &["c"]);
    let mut rx = harness.subscribe();

    harness.start_run(&[]).await.unwrap();
    harness.wait_for(&mut rx, EventKind::RunComplete).await;

    assert_eq!(harness.node_status("a").await, NodeStatus::Ran);
    assert_eq!(harness.node_status("b").await, NodeStatus::Ran);
    assert_eq!(harness.node_status("c").await, NodeStatus::Fail);
    assert_eq!(harness.node_status("d").await, NodeStatus::Idle);

    // The blocked branch never became ready.
    assert!(!harness
        .events_of_kind(EventKind::NodeReady)
        .iter()
        .any(|e| e.node_id.as_deref() == Some("d")));

    runner.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn empty_selection_resumes_failed_nodes() {
    init_tracing();

    // Same shape as the failure scenario, with c already failed.
    let graph = GraphBuilder::new()
        .node_with_status("a", "echo a", NodeStatus::Ran)
        .node_with_status("b", "echo b", NodeStatus::Ran)
        .node_with_status("c", "false", NodeStatus::Fail)
        .node("d", "echo d")
        .edge("a", "b")
        .edge("a", "c")
        .edge("c", "d")
        .build();
    let harness = EngineHarness::start(graph).await;
    let runner = FakeRunner::spawn(&harness, &[]);
    let mut rx = harness.subscribe();

    harness.start_run(&[]).await.unwrap();
    harness.wait_for(&mut rx, EventKind::RunComplete).await;

    // Only the failed node was selected and re-executed.
    assert_eq!(runner.executed(), vec!["c"]);
    assert_eq!(harness.node_status("c").await, NodeStatus::Ran);
    // Propagation is confined to the resumed set.
    assert_eq!(harness.node_status("d").await, NodeStatus::Idle);
    assert_eq!(harness.node_status("a").await, NodeStatus::Ran);

    runner.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn subset_run_starts_from_induced_roots() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .node("c", "echo c")
        .node("d", "echo d")
        .edge("a", "b")
        .edge("b", "c")
        .edge("c", "d")
        .build();
    let harness = EngineHarness::start(graph).await;
    let runner = FakeRunner::spawn(&harness, &[]);
    let mut rx = harness.subscribe();

    harness.start_run(&["c", "d"]).await.unwrap();
    harness.wait_for(&mut rx, EventKind::RunComplete).await;

    // c is a root of the induced subgraph: it ran without waiting for b.
    assert_eq!(runner.executed(), vec!["c", "d"]);
    assert_eq!(harness.node_status("a").await, NodeStatus::Idle);
    assert_eq!(harness.node_status("b").await, NodeStatus::Idle);
    assert_eq!(harness.node_status("c").await, NodeStatus::Ran);
    assert_eq!(harness.node_status("d").await, NodeStatus::Ran);

    runner.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn run_wrapper_override_reaches_node_ready() {
    init_tracing();

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .wrapper("sh -c {}")
        .build();
    let harness = EngineHarness::start(graph).await;
    let mut rx = harness.subscribe();

    harness
        .start_run_with_wrapper(&[], Some("bash -lc {}".to_string()))
        .await
        .unwrap();
    let ready = harness.wait_for(&mut rx, EventKind::NodeReady).await;
    assert_eq!(
        ready.payload.get("wrapper").and_then(|w| w.as_str()),
        Some("bash -lc {}")
    );

    harness.shutdown().await;
}
