// src/engine/events.rs

//! Domain events and the synchronous per-workspace event bus.
//!
//! Events are semantic facts about state changes, not transport messages.
//! Emission happens from the worker only; sinks decide how to forward or
//! persist each event. Sink errors are logged and never propagate back into
//! the worker.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::types::{NodeId, RunId, WorkspaceId};

/// Rotation threshold for the JSON-lines event log.
pub const MAX_EVENT_LOG_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "NODE_READY")]
    NodeReady,
    #[serde(rename = "NODE_STARTED")]
    NodeStarted,
    #[serde(rename = "NODE_FINISHED")]
    NodeFinished,
    #[serde(rename = "NODE_FAILED")]
    NodeFailed,
    #[serde(rename = "RUN_COMPLETE")]
    RunComplete,
    #[serde(rename = "GRAPH_UPDATED")]
    GraphUpdated,
    #[serde(rename = "GRAPH_REJECTED")]
    GraphRejected,
    #[serde(rename = "RUN_REJECTED")]
    RunRejected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NodeReady => "NODE_READY",
            EventKind::NodeStarted => "NODE_STARTED",
            EventKind::NodeFinished => "NODE_FINISHED",
            EventKind::NodeFailed => "NODE_FAILED",
            EventKind::RunComplete => "RUN_COMPLETE",
            EventKind::GraphUpdated => "GRAPH_UPDATED",
            EventKind::GraphRejected => "GRAPH_REJECTED",
            EventKind::RunRejected => "RUN_REJECTED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One domain event, sequence-numbered per workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub workspace_id: WorkspaceId,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Abstraction over an output target that consumes full events.
pub trait EventSink: Send {
    fn handle(&mut self, event: &Event) -> io::Result<()>;
}

/// Synchronous publish/subscribe owned by the worker.
pub struct EventBus {
    workspace_id: WorkspaceId,
    seq: u64,
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventBus {
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            seq: 0,
            sinks: Vec::new(),
        }
    }

    pub fn add_sink<S: EventSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Box::new(sink));
    }

    /// Stamp and deliver an event to every sink.
    ///
    /// Sink failures are logged; delivery to the remaining sinks continues.
    pub fn emit(
        &mut self,
        kind: EventKind,
        run_id: Option<RunId>,
        node_id: Option<NodeId>,
        payload: serde_json::Value,
    ) {
        self.seq += 1;
        let event = Event {
            workspace_id: self.workspace_id.clone(),
            seq: self.seq,
            ts: Utc::now(),
            kind,
            run_id,
            node_id,
            payload,
        };
        debug!(
            workspace_id = %event.workspace_id,
            seq = event.seq,
            kind = %event.kind,
            "emitting event"
        );
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.handle(&event) {
                error!(kind = %event.kind, error = %e, "event sink failed");
            }
        }
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &Event) -> io::Result<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Sink feeding the realtime transport: events go out over a tokio
/// broadcast channel that WebSocket connections subscribe to.
pub struct BroadcastSink {
    tx: tokio::sync::broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(tx: tokio::sync::broadcast::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for BroadcastSink {
    fn handle(&mut self, event: &Event) -> io::Result<()> {
        // No receivers is fine; frames only matter to connected clients.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Append-only JSON-lines log shared by every workspace bus in the process.
///
/// One line per event; rotated to `events.log.N` past [`MAX_EVENT_LOG_SIZE`].
pub struct EventLog {
    path: PathBuf,
    max_size: u64,
    inner: Mutex<()>,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Arc<Self> {
        Self::with_max_size(path, MAX_EVENT_LOG_SIZE)
    }

    pub fn with_max_size(path: PathBuf, max_size: u64) -> Arc<Self> {
        Arc::new(Self {
            path,
            max_size,
            inner: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &Event) -> io::Result<()> {
        let _guard = self.inner.lock().unwrap();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Ok(meta) = fs::metadata(&self.path) {
            if meta.len() >= self.max_size {
                self.rotate()?;
            }
        }

        let line = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        use io::Write;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Rename the current file to the next free `events.log.N`.
    fn rotate(&self) -> io::Result<()> {
        let mut n = 1u32;
        loop {
            let candidate = rotated_path(&self.path, n);
            if !candidate.exists() {
                fs::rename(&self.path, &candidate)?;
                info!(to = %candidate.display(), "rotated event log");
                return Ok(());
            }
            n += 1;
        }
    }
}

fn rotated_path(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Per-bus handle onto the shared [`EventLog`].
pub struct JsonLogSink {
    log: Arc<EventLog>,
}

impl JsonLogSink {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }
}

impl EventSink for JsonLogSink {
    fn handle(&mut self, event: &Event) -> io::Result<()> {
        self.log.append(event)
    }
}
