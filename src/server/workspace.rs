// src/server/workspace.rs

//! Workspace contexts and their lifecycle.
//!
//! A workspace is an isolated scheduling context for one graph file,
//! identified by a content-free 256-bit hash of the file's absolute path.
//! Contexts are created on first client connect and torn down, after a
//! grace period, once the last client leaves and no runs are active.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::events::{BroadcastSink, EventBus, EventLog, JsonLogSink};
use crate::engine::{ApplyOutcome, Event, GraphWorker, Mutation, MutationRecord, Origin};
use crate::errors::{Result, WorkgraphError};
use crate::graph::{GraphStore, StorageDriver};
use crate::types::WorkspaceId;

/// Queue depth before producers block (bounded back-pressure).
const MOD_QUEUE_DEPTH: usize = 256;

/// Broadcast buffer for the realtime bridge.
const EVENT_CHANNEL_DEPTH: usize = 512;

/// Delay between the last disconnect and the teardown check.
pub const IDLE_GRACE: Duration = Duration::from_secs(1);

/// Workspace id: hex-encoded blake3 hash of the absolute path string.
pub fn workspace_id_for_path(path: &Path) -> WorkspaceId {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    blake3::hash(absolute.to_string_lossy().as_bytes())
        .to_hex()
        .to_string()
}

/// Per-user state directory holding the event log.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WORKGRAPH_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("workgraph")
}

/// One open workspace: the queue into its worker plus bookkeeping the
/// surface needs (client count, active-run count, event fan-out).
pub struct WorkspaceContext {
    pub id: WorkspaceId,
    pub path: PathBuf,
    queue: mpsc::Sender<MutationRecord>,
    events: broadcast::Sender<Event>,
    clients: AtomicUsize,
    active_runs: Arc<AtomicUsize>,
}

impl WorkspaceContext {
    /// Enqueue a mutation and await its apply latch.
    pub async fn apply(
        &self,
        origin: Origin,
        mutation: Mutation,
        timeout: Duration,
    ) -> Result<ApplyOutcome> {
        let (record, rx) = MutationRecord::with_latch(origin, mutation);
        self.queue
            .send(record)
            .await
            .map_err(|_| WorkgraphError::WorkspaceNotFound(self.id.clone()))?;
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => Err(WorkgraphError::MutationTimeout),
            Ok(Err(_)) => Err(WorkgraphError::Other(anyhow::anyhow!(
                "graph worker dropped the mutation"
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// Enqueue without waiting (lifecycle mutations).
    pub async fn apply_detached(&self, origin: Origin, mutation: Mutation) {
        let record = MutationRecord::new(origin, mutation);
        if self.queue.send(record).await.is_err() {
            warn!(workspace_id = %self.id, "queue closed; lifecycle mutation dropped");
        }
    }

    /// Subscribe to this workspace's domain events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub fn active_run_count(&self) -> usize {
        self.active_runs.load(Ordering::SeqCst)
    }
}

struct RegistryInner {
    workspaces: HashMap<WorkspaceId, Arc<WorkspaceContext>>,
    /// Paths learned from the CLI or previous connects, so a later
    /// `/client-connect` without a body can reopen the workspace.
    known_paths: HashMap<WorkspaceId, PathBuf>,
}

/// All open workspaces of this process.
pub struct WorkspaceRegistry {
    inner: Mutex<RegistryInner>,
    storage: Arc<dyn StorageDriver>,
    event_log: Arc<EventLog>,
    /// Cancelled when the last workspace closes (serve `--exit-when-idle`).
    idle_exit: Option<CancellationToken>,
}

impl WorkspaceRegistry {
    pub fn new(
        storage: Arc<dyn StorageDriver>,
        event_log: Arc<EventLog>,
        idle_exit: Option<CancellationToken>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                workspaces: HashMap::new(),
                known_paths: HashMap::new(),
            }),
            storage,
            event_log,
            idle_exit,
        })
    }

    /// Remember a path so its workspace can be opened by id alone.
    pub fn register_path(&self, path: &Path) -> WorkspaceId {
        let id = workspace_id_for_path(path);
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.inner
            .lock()
            .unwrap()
            .known_paths
            .insert(id.clone(), absolute);
        id
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkspaceContext>> {
        self.inner.lock().unwrap().workspaces.get(id).cloned()
    }

    /// First connect creates the context; every connect bumps the client
    /// count.
    pub fn connect(&self, id: &str, path: Option<&Path>) -> Result<Arc<WorkspaceContext>> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(path) = path {
            let derived = workspace_id_for_path(path);
            if derived != id {
                return Err(WorkgraphError::WorkspaceNotFound(format!(
                    "{id} does not match the supplied path"
                )));
            }
            let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            inner.known_paths.insert(id.to_string(), absolute);
        }

        if let Some(ctx) = inner.workspaces.get(id) {
            ctx.clients.fetch_add(1, Ordering::SeqCst);
            return Ok(ctx.clone());
        }

        let path = inner
            .known_paths
            .get(id)
            .cloned()
            .ok_or_else(|| WorkgraphError::WorkspaceNotFound(id.to_string()))?;

        let ctx = self.open_workspace(id.to_string(), path)?;
        ctx.clients.fetch_add(1, Ordering::SeqCst);
        inner.workspaces.insert(id.to_string(), ctx.clone());
        Ok(ctx)
    }

    fn open_workspace(&self, id: WorkspaceId, path: PathBuf) -> Result<Arc<WorkspaceContext>> {
        let store = GraphStore::open(path.clone(), self.storage.clone())?;

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        let mut bus = EventBus::new(id.clone());
        bus.add_sink(JsonLogSink::new(self.event_log.clone()));
        bus.add_sink(BroadcastSink::new(events_tx.clone()));

        let (queue_tx, queue_rx) = mpsc::channel(MOD_QUEUE_DEPTH);
        let active_runs = Arc::new(AtomicUsize::new(0));

        let worker = GraphWorker::new(store, bus, queue_rx, active_runs.clone());
        tokio::spawn(worker.run());

        info!(workspace_id = %id, path = %path.display(), "workspace opened");
        Ok(Arc::new(WorkspaceContext {
            id,
            path,
            queue: queue_tx,
            events: events_tx,
            clients: AtomicUsize::new(0),
            active_runs,
        }))
    }

    /// Drop one client. The last disconnect cancels outstanding runs and
    /// arms the idle teardown timer.
    pub fn disconnect(self: &Arc<Self>, id: &str) -> Result<usize> {
        let ctx = self
            .get(id)
            .ok_or_else(|| WorkgraphError::WorkspaceNotFound(id.to_string()))?;

        let mut count = ctx.clients.load(Ordering::SeqCst);
        loop {
            if count == 0 {
                break;
            }
            match ctx.clients.compare_exchange(
                count,
                count - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    count -= 1;
                    break;
                }
                Err(actual) => count = actual,
            }
        }

        if count == 0 {
            let registry = self.clone();
            let workspace_id = id.to_string();
            tokio::spawn(async move {
                if let Some(ctx) = registry.get(&workspace_id) {
                    ctx.apply_detached(Origin::Server, Mutation::CancelRuns).await;
                }
                tokio::time::sleep(IDLE_GRACE).await;
                registry.maybe_teardown(&workspace_id);
            });
        }
        Ok(count)
    }

    /// Tear the workspace down if it is still idle after the grace period.
    fn maybe_teardown(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let idle = inner
            .workspaces
            .get(id)
            .map(|ctx| ctx.client_count() == 0 && ctx.active_run_count() == 0)
            .unwrap_or(false);
        if !idle {
            debug!(workspace_id = %id, "teardown skipped; workspace busy again");
            return;
        }
        // Dropping the context drops the queue sender; the worker drains
        // and exits.
        inner.workspaces.remove(id);
        info!(workspace_id = %id, "workspace torn down");

        if inner.workspaces.is_empty() {
            if let Some(token) = &self.idle_exit {
                info!("no workspaces remain; requesting shutdown");
                token.cancel();
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().unwrap().workspaces.len()
    }
}
