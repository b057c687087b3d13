// src/engine/mutation.rs

//! Mutation records: the tagged sum type flowing through the modification
//! queue, plus the apply-latch the HTTP surface awaits.

use tokio::sync::oneshot;

use crate::errors::Result;
use crate::graph::node_link::NodeLinkDocument;
use crate::graph::EdgeSelector;
use crate::types::{EdgeType, ElementKind, NodeId, RunId};

/// Who enqueued a record. Used for audit and event attribution only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Client(String),
    Runner(String),
    /// The workspace itself (lifecycle sweeps, teardown).
    Server,
}

impl Origin {
    pub fn as_str(&self) -> &str {
        match self {
            Origin::Client(id) => id,
            Origin::Runner(id) => id,
            Origin::Server => "server",
        }
    }
}

/// Parameters of a `/run` request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Explicit node selection; empty means "failed nodes, else all".
    pub nodes: Vec<NodeId>,
    /// Wrapper override for this run.
    pub wrapper: Option<String>,
}

/// A pending graph mutation or query.
///
/// Queries (`Checkpoint`, `GetNodeLog`) ride the same queue so that reads
/// observe a worker-acknowledged state.
#[derive(Debug)]
pub enum Mutation {
    AddNode {
        label: String,
        x: String,
        y: String,
    },
    RemoveNode {
        node_id: NodeId,
    },
    AddEdge {
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
    },
    RemoveEdge {
        selector: EdgeSelector,
    },
    EditEdgeType {
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
    },
    EditStatus {
        kind: ElementKind,
        id: String,
        /// Raw wire status; validated against `kind` when applied.
        status: String,
        run_id: Option<RunId>,
    },
    EditPosition {
        node_id: NodeId,
        x: String,
        y: String,
    },
    EditLabel {
        node_id: NodeId,
        label: String,
    },
    EditWrapper {
        wrapper: Option<String>,
    },
    SaveNodeLog {
        node_id: NodeId,
        log: String,
    },
    /// Create a run: selection, cycle check, root seeding.
    StartRun {
        request: RunRequest,
    },
    /// Cancel every active run (client removal, workspace teardown).
    CancelRuns,
    /// Acknowledge a storage failure and resume mutation processing.
    AckStorage,
    /// No-op barrier: reads snapshot the graph after this applies.
    Checkpoint,
    GetNodeLog {
        node_id: NodeId,
    },
}

impl Mutation {
    /// Short name for logs and audit records.
    pub fn op_name(&self) -> &'static str {
        match self {
            Mutation::AddNode { .. } => "add_node",
            Mutation::RemoveNode { .. } => "remove_node",
            Mutation::AddEdge { .. } => "add_edge",
            Mutation::RemoveEdge { .. } => "remove_edge",
            Mutation::EditEdgeType { .. } => "edit_edge_type",
            Mutation::EditStatus { .. } => "edit_status",
            Mutation::EditPosition { .. } => "edit_position",
            Mutation::EditLabel { .. } => "edit_label",
            Mutation::EditWrapper { .. } => "edit_wrapper",
            Mutation::SaveNodeLog { .. } => "save_node_log",
            Mutation::StartRun { .. } => "start_run",
            Mutation::CancelRuns => "cancel_runs",
            Mutation::AckStorage => "ack_storage",
            Mutation::Checkpoint => "checkpoint",
            Mutation::GetNodeLog { .. } => "get_node_log",
        }
    }

    /// Whether this record can change graph state (and so needs a save).
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Mutation::Checkpoint | Mutation::GetNodeLog { .. } | Mutation::AckStorage
        )
    }
}

/// Result handed back through the apply latch.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied,
    NodeCreated { node_id: NodeId },
    EdgeCreated { edge_id: String },
    RunStarted { run_id: RunId },
    Snapshot(Box<NodeLinkDocument>),
    NodeLog(String),
}

/// One queue entry: the mutation, its origin, and an optional latch the
/// enqueuing handler awaits.
#[derive(Debug)]
pub struct MutationRecord {
    pub origin: Origin,
    pub mutation: Mutation,
    pub reply: Option<oneshot::Sender<Result<ApplyOutcome>>>,
}

impl MutationRecord {
    pub fn new(origin: Origin, mutation: Mutation) -> Self {
        Self {
            origin,
            mutation,
            reply: None,
        }
    }

    /// Build a record plus the receiving half of its apply latch.
    pub fn with_latch(
        origin: Origin,
        mutation: Mutation,
    ) -> (Self, oneshot::Receiver<Result<ApplyOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                origin,
                mutation,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Resolve the latch, if the caller is still waiting.
    pub fn resolve(self, outcome: Result<ApplyOutcome>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(outcome);
        } else if let Err(e) = outcome {
            tracing::warn!(error = %e, "latch-free mutation failed");
        }
    }
}
