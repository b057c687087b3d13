#![allow(dead_code)]

//! In-process engine harness: a graph worker wired to a temp-file store, a
//! memory sink for assertions, and a broadcast channel tests (or the fake
//! runner) can await events on.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use workgraph::engine::events::{BroadcastSink, EventBus, EventLog, JsonLogSink};
use workgraph::engine::{
    ApplyOutcome, Event, EventKind, GraphWorker, MemorySink, Mutation, MutationRecord, Origin,
    RunRequest,
};
use workgraph::errors::Result;
use workgraph::graph::node_link::NodeLinkDocument;
use workgraph::graph::{Graph, GraphStore, JsonFileStorage, StorageDriver};
use workgraph::types::{ElementKind, NodeStatus, RunId};

const APPLY_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EngineHarness {
    queue: mpsc::Sender<MutationRecord>,
    events_tx: broadcast::Sender<Event>,
    sink: MemorySink,
    _dir: tempfile::TempDir,
    pub graph_path: PathBuf,
    worker: JoinHandle<()>,
}

impl EngineHarness {
    /// Persist `graph` to a temp file and spawn a worker over it.
    pub async fn start(graph: Graph) -> Self {
        Self::start_with_log(graph, None).await
    }

    pub async fn start_with_log(graph: Graph, event_log: Option<Arc<EventLog>>) -> Self {
        Self::start_inner(graph, event_log, Arc::new(JsonFileStorage)).await
    }

    /// Start with a custom storage driver (e.g. one that fails on demand).
    pub async fn start_with_driver(graph: Graph, driver: Arc<dyn StorageDriver>) -> Self {
        Self::start_inner(graph, None, driver).await
    }

    async fn start_inner(
        graph: Graph,
        event_log: Option<Arc<EventLog>>,
        driver: Arc<dyn StorageDriver>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let graph_path = dir.path().join("pipeline.json");
        driver.save(&graph, &graph_path).expect("seed graph");

        let store = GraphStore::open(graph_path.clone(), driver).expect("open store");
        let (events_tx, _) = broadcast::channel(1024);
        let sink = MemorySink::new();
        let mut bus = EventBus::new("test-workspace".to_string());
        bus.add_sink(sink.clone());
        bus.add_sink(BroadcastSink::new(events_tx.clone()));
        if let Some(log) = event_log {
            bus.add_sink(JsonLogSink::new(log));
        }

        let (queue_tx, queue_rx) = mpsc::channel(64);
        let worker = GraphWorker::new(store, bus, queue_rx, Arc::new(AtomicUsize::new(0)));
        let worker = tokio::spawn(worker.run());

        Self {
            queue: queue_tx,
            events_tx,
            sink,
            _dir: dir,
            graph_path,
            worker,
        }
    }

    /// Enqueue a mutation and await its latch.
    pub async fn apply(&self, mutation: Mutation) -> Result<ApplyOutcome> {
        self.apply_as(Origin::Client("test".to_string()), mutation).await
    }

    pub async fn apply_as(&self, origin: Origin, mutation: Mutation) -> Result<ApplyOutcome> {
        let (record, rx) = MutationRecord::with_latch(origin, mutation);
        self.queue.send(record).await.expect("queue open");
        tokio::time::timeout(APPLY_TIMEOUT, rx)
            .await
            .expect("worker answered in time")
            .expect("latch resolved")
    }

    /// Simulate a runner status callback.
    pub async fn node_callback(&self, node_id: &str, status: &str, run_id: &str) {
        self.apply_as(
            Origin::Runner(format!("runner:{run_id}")),
            Mutation::EditStatus {
                kind: ElementKind::Node,
                id: node_id.to_string(),
                status: status.to_string(),
                run_id: Some(run_id.to_string()),
            },
        )
        .await
        .expect("status callback applied");
    }

    pub async fn start_run(&self, nodes: &[&str]) -> Result<RunId> {
        self.start_run_with_wrapper(nodes, None).await
    }

    pub async fn start_run_with_wrapper(
        &self,
        nodes: &[&str],
        wrapper: Option<String>,
    ) -> Result<RunId> {
        let request = RunRequest {
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            wrapper,
        };
        match self.apply(Mutation::StartRun { request }).await? {
            ApplyOutcome::RunStarted { run_id } => Ok(run_id),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    pub async fn snapshot(&self) -> NodeLinkDocument {
        match self.apply(Mutation::Checkpoint).await.expect("checkpoint") {
            ApplyOutcome::Snapshot(doc) => *doc,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    pub async fn node_status(&self, node_id: &str) -> NodeStatus {
        self.snapshot()
            .await
            .nodes
            .into_iter()
            .find(|n| n.id == node_id)
            .map(|n| n.status)
            .unwrap_or_else(|| panic!("node {node_id} missing from snapshot"))
    }

    /// Everything emitted so far, in sequence order.
    pub fn events(&self) -> Vec<Event> {
        self.sink.snapshot()
    }

    pub fn events_of_kind(&self, kind: EventKind) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Await an event of `kind`, starting from `rx`'s subscription point.
    pub async fn wait_for(
        &self,
        rx: &mut broadcast::Receiver<Event>,
        kind: EventKind,
    ) -> Event {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind == kind => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
    }

    /// Drop the queue so the worker drains and exits.
    pub async fn shutdown(self) {
        drop(self.queue);
        let _ = self.worker.await;
    }
}

/// Fake runner: listens for `node_ready`, records the execution order, and
/// immediately reports `running` then `ran` (or `fail` for configured
/// nodes) back through the queue.
pub struct FakeRunner {
    pub executed: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeRunner {
    pub fn spawn(harness: &EngineHarness, fail: &[&str]) -> Self {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let fail: HashSet<String> = fail.iter().map(|s| s.to_string()).collect();
        let queue = harness.queue.clone();
        let mut rx = harness.subscribe();
        let executed_clone = executed.clone();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if event.kind != EventKind::NodeReady {
                    continue;
                }
                let Some(node_id) = event.node_id.clone() else {
                    continue;
                };
                let Some(run_id) = event.run_id.clone() else {
                    continue;
                };
                executed_clone.lock().unwrap().push(node_id.clone());

                let outcome = if fail.contains(&node_id) { "fail" } else { "ran" };
                for status in ["running", outcome] {
                    let record = MutationRecord::new(
                        Origin::Runner(format!("runner:{run_id}")),
                        Mutation::EditStatus {
                            kind: ElementKind::Node,
                            id: node_id.clone(),
                            status: status.to_string(),
                            run_id: Some(run_id.clone()),
                        },
                    );
                    if queue.send(record).await.is_err() {
                        return;
                    }
                }
            }
        });

        Self { executed, handle }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
