// tests/event_log.rs

//! The append-only event log: JSON-lines layout, sequence numbering, and
//! rotation under load.

use workgraph::engine::events::EventLog;
use workgraph::engine::{Event, EventKind, Mutation};
use workgraph_test_utils::builders::GraphBuilder;
use workgraph_test_utils::harness::{EngineHarness, FakeRunner};
use workgraph_test_utils::init_tracing;

#[tokio::test]
async fn events_are_logged_as_json_lines_in_sequence() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let log = EventLog::new(log_path.clone());

    let graph = GraphBuilder::new()
        .node("a", "echo a")
        .node("b", "echo b")
        .edge("a", "b")
        .build();
    let harness = EngineHarness::start_with_log(graph, Some(log)).await;
    let runner = FakeRunner::spawn(&harness, &[]);
    let mut rx = harness.subscribe();

    harness.start_run(&[]).await.unwrap();
    harness.wait_for(&mut rx, EventKind::RunComplete).await;
    // Checkpoint flushes nothing but guarantees the worker is past the run.
    harness.snapshot().await;

    let raw = std::fs::read_to_string(&log_path).unwrap();
    let events: Vec<Event> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(!events.is_empty());

    // Strictly increasing sequence numbers within the workspace.
    for pair in events.windows(2) {
        assert!(pair[1].seq > pair[0].seq);
    }
    assert!(events.iter().all(|e| e.workspace_id == "test-workspace"));
    assert!(events.iter().any(|e| e.kind == EventKind::RunComplete));

    runner.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn log_rotation_keeps_old_events_readable() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    // Tiny threshold so a handful of graph updates forces rotation.
    let log = EventLog::with_max_size(log_path.clone(), 2048);

    let graph = GraphBuilder::new().node("a", "echo a").build();
    let harness = EngineHarness::start_with_log(graph, Some(log)).await;

    for i in 0..40 {
        harness
            .apply(Mutation::EditLabel {
                node_id: "a".to_string(),
                label: format!("echo generation {i}"),
            })
            .await
            .unwrap();
    }

    let rotated = log_path.with_extension("log.1");
    assert!(log_path.exists());
    assert!(rotated.exists(), "expected a rotated segment");

    let raw = std::fs::read_to_string(&rotated).unwrap();
    for line in raw.lines() {
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, EventKind::GraphUpdated);
    }

    harness.shutdown().await;
}
