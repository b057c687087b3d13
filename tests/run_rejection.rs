// tests/run_rejection.rs

//! Rejection and error paths: cycles, empty selections, busy nodes, stale
//! callbacks, idempotent edits, and storage suspension.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use workgraph::engine::{EventKind, Mutation};
use workgraph::errors::WorkgraphError;
use workgraph::graph::{Graph, JsonFileStorage, StorageDriver};
use workgraph::types::{ElementKind, NodeStatus};
use workgraph_test_utils::builders::GraphBuilder;
use workgraph_test_utils::harness::EngineHarness;
use workgraph_test_utils::init_tracing;

#[tokio::test]
async fn blocking_cycle_rejects_the_run() {
    init_tracing();

    // The cycle exists on disk (e.g. written by an external editor); run
    // creation must reject it.
    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .edge("a", "b")
        .edge("b", "a")
        .build();
    let harness = EngineHarness::start(graph).await;

    let err = harness.start_run(&["a", "b"]).await.unwrap_err();
    assert!(matches!(err, WorkgraphError::RunRejected(_)));

    assert_eq!(harness.events_of_kind(EventKind::RunRejected).len(), 1);
    assert!(harness.events_of_kind(EventKind::NodeReady).is_empty());
    assert_eq!(harness.node_status("a").await, NodeStatus::Idle);
    assert_eq!(harness.node_status("b").await, NodeStatus::Idle);
}

#[tokio::test]
async fn run_with_only_missing_nodes_is_rejected() {
    init_tracing();

    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start(graph).await;

    let err = harness.start_run(&["ghost"]).await.unwrap_err();
    assert!(matches!(err, WorkgraphError::RunRejected(_)));
    assert_eq!(harness.events_of_kind(EventKind::RunRejected).len(), 1);
}

#[tokio::test]
async fn node_running_under_another_run_blocks_new_run() {
    init_tracing();

    let graph = GraphBuilder::new().node("a", "sleep 5").build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&["a"]).await.unwrap();
    harness.node_callback("a", "running", &run_id).await;

    let err = harness.start_run(&["a"]).await.unwrap_err();
    assert!(matches!(err, WorkgraphError::RunRejected(_)));

    // First run is unaffected and still completes.
    harness.node_callback("a", "ran", &run_id).await;
    assert_eq!(harness.events_of_kind(EventKind::RunComplete).len(), 1);
}

#[tokio::test]
async fn stale_runner_callbacks_are_discarded() {
    init_tracing();

    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start(graph).await;

    let run_id = harness.start_run(&["a"]).await.unwrap();
    harness.node_callback("a", "running", &run_id).await;
    harness.node_callback("a", "ran", &run_id).await;
    assert_eq!(harness.events_of_kind(EventKind::RunComplete).len(), 1);

    // The run is gone; a late failure report from its runner is ignored.
    harness.node_callback("a", "fail", &run_id).await;
    assert_eq!(harness.node_status("a").await, NodeStatus::Ran);
    assert!(harness.events_of_kind(EventKind::NodeFailed).is_empty());
}

#[tokio::test]
async fn idempotent_status_edit_emits_no_transition_events() {
    init_tracing();

    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start(graph).await;

    let before = harness.events().len();
    harness
        .apply(Mutation::EditStatus {
            kind: ElementKind::Node,
            id: "a".to_string(),
            status: String::new(),
            run_id: None,
        })
        .await
        .unwrap();
    // Same effective state: nothing was emitted at all.
    assert_eq!(harness.events().len(), before);
}

#[tokio::test]
async fn structural_errors_emit_graph_rejected() {
    init_tracing();

    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start(graph).await;

    let err = harness
        .apply(Mutation::AddEdge {
            source_id: "a".to_string(),
            target_id: "ghost".to_string(),
            edge_type: Default::default(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkgraphError::MissingEndpoint { .. }));
    assert_eq!(harness.events_of_kind(EventKind::GraphRejected).len(), 1);

    // State untouched.
    assert_eq!(harness.snapshot().await.links.len(), 0);
}

#[tokio::test]
async fn invalid_status_value_is_a_client_error() {
    init_tracing();

    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start(graph).await;

    let err = harness
        .apply(Mutation::EditStatus {
            kind: ElementKind::Node,
            id: "a".to_string(),
            status: "done".to_string(),
            run_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkgraphError::InvalidStatus { .. }));
}

/// Storage driver that fails saves while the flag is up.
struct FlakyStorage {
    inner: JsonFileStorage,
    failing: Arc<AtomicBool>,
}

impl StorageDriver for FlakyStorage {
    fn load(&self, path: &Path) -> workgraph::errors::Result<Graph> {
        self.inner.load(path)
    }

    fn save(&self, graph: &Graph, path: &Path) -> workgraph::errors::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkgraphError::Storage("disk full".to_string()));
        }
        self.inner.save(graph, path)
    }
}

#[tokio::test]
async fn persistent_save_failure_suspends_until_acknowledged() {
    init_tracing();

    let failing = Arc::new(AtomicBool::new(false));
    let driver = Arc::new(FlakyStorage {
        inner: JsonFileStorage,
        failing: failing.clone(),
    });
    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start_with_driver(graph, driver).await;

    failing.store(true, Ordering::SeqCst);
    harness
        .apply(Mutation::EditLabel {
            node_id: "a".to_string(),
            label: "echo a2".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(harness.events_of_kind(EventKind::GraphRejected).len(), 1);

    // Writes now fail fast; reads still pass.
    let err = harness
        .apply(Mutation::EditLabel {
            node_id: "a".to_string(),
            label: "echo a3".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkgraphError::StorageSuspended));
    harness.snapshot().await;

    // Acknowledge once the disk recovers.
    failing.store(false, Ordering::SeqCst);
    harness.apply(Mutation::AckStorage).await.unwrap();
    harness
        .apply(Mutation::EditLabel {
            node_id: "a".to_string(),
            label: "echo a3".to_string(),
        })
        .await
        .unwrap();
}
