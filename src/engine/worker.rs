// src/engine/worker.rs

//! The graph worker: a single cooperative consumer of the modification
//! queue.
//!
//! For each record the worker (a) applies the mutation to the graph store,
//! (b) runs the state-machine hook when the record changed a status,
//! (c) persists through the storage driver, and (d) emits domain events.
//! After every record it performs the completion sweep.
//!
//! Nothing else may write the graph; queue order is the linearization.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::{Result, WorkgraphError};
use crate::graph::GraphStore;
use crate::types::{EdgeStatus, ElementKind, NodeStatus};

use super::events::{EventBus, EventKind};
use super::mutation::{ApplyOutcome, Mutation, MutationRecord, Origin};
use super::runs::{plan_run, RunRegistry, RunState};
use super::scheduler::SchedulerCtx;

pub struct GraphWorker {
    store: GraphStore,
    bus: EventBus,
    runs: RunRegistry,
    rx: mpsc::Receiver<MutationRecord>,
    /// Mirror of the active-run count, read by the workspace idle sweep.
    run_count: Arc<AtomicUsize>,
    /// Set after a persistent save failure; writes fail fast until a client
    /// acknowledges.
    suspended: bool,
}

impl GraphWorker {
    pub fn new(
        store: GraphStore,
        bus: EventBus,
        rx: mpsc::Receiver<MutationRecord>,
        run_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            store,
            bus,
            runs: RunRegistry::new(),
            rx,
            run_count,
            suspended: false,
        }
    }

    /// Main loop: consume until the queue's senders are gone.
    pub async fn run(mut self) {
        info!(path = %self.store.path().display(), "graph worker started");
        while let Some(record) = self.rx.recv().await {
            self.process(record);
        }
        info!(path = %self.store.path().display(), "graph worker exiting");
    }

    fn process(&mut self, record: MutationRecord) {
        let op = record.mutation.op_name();
        let origin = record.origin.clone();
        let is_write = record.mutation.is_write();

        if self.suspended && is_write {
            record.resolve(Err(WorkgraphError::StorageSuspended));
            return;
        }

        let MutationRecord {
            mutation, reply, ..
        } = record;

        let applied = catch_unwind(AssertUnwindSafe(|| self.apply(mutation, &origin)));

        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(_) => {
                // A panicking handler drops its record; invariants are
                // restored by the next successful mutation.
                error!(op, origin = %origin.as_str(), "mutation handler panicked; record dropped");
                self.bus.emit(
                    EventKind::GraphRejected,
                    None,
                    None,
                    json!({"op": op, "origin": origin.as_str(), "error": "internal panic"}),
                );
                if let Some(reply) = reply {
                    let _ = reply.send(Err(WorkgraphError::Other(anyhow::anyhow!(
                        "mutation handler panicked"
                    ))));
                }
                return;
            }
        };

        let outcome = match outcome {
            Ok((outcome, changed)) => {
                if changed {
                    if let Err(e) = self.store.save() {
                        warn!(op, error = %e, "graph save failed twice; suspending mutations");
                        self.suspended = true;
                        self.bus.emit(
                            EventKind::GraphRejected,
                            None,
                            None,
                            json!({
                                "op": op,
                                "origin": origin.as_str(),
                                "error": format!("storage: {e}"),
                            }),
                        );
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.bus.emit(
                    EventKind::GraphRejected,
                    None,
                    None,
                    json!({"op": op, "origin": origin.as_str(), "error": e.to_string()}),
                );
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }

        // Post-drain check folded in here: a sweep after every record is a
        // superset of sweeping on queue drain and stays idempotent.
        self.sweep();
        self.run_count.store(self.runs.len(), Ordering::SeqCst);
    }

    fn sweep(&mut self) {
        let mut ctx = SchedulerCtx::new(self.store.graph_mut(), &mut self.runs, &mut self.bus);
        ctx.completion_sweep();
    }

    /// Apply one mutation. Returns the outcome and whether graph state
    /// changed (and so needs a save).
    ///
    /// Any error leaves the graph and the run registry untouched.
    fn apply(&mut self, mutation: Mutation, origin: &Origin) -> Result<(ApplyOutcome, bool)> {
        match mutation {
            Mutation::AddNode { label, x, y } => {
                let node_id = self.store.graph_mut().add_node(&label, &x, &y);
                self.emit_graph_updated_full(origin);
                Ok((ApplyOutcome::NodeCreated { node_id }, true))
            }
            Mutation::RemoveNode { node_id } => {
                self.store.graph_mut().remove_node(&node_id)?;
                // A removed node leaves its run silently; only the graph
                // update is announced.
                self.runs.release(&node_id);
                for run_id in self.runs.run_ids() {
                    if let Some(state) = self.runs.get_mut(&run_id) {
                        state.nodes.remove(&node_id);
                    }
                }
                self.emit_graph_updated_full(origin);
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::AddEdge {
                source_id,
                target_id,
                edge_type,
            } => {
                let edge_id = self
                    .store
                    .graph_mut()
                    .add_edge(&source_id, &target_id, edge_type)?;
                self.emit_graph_updated_full(origin);
                Ok((ApplyOutcome::EdgeCreated { edge_id }, true))
            }
            Mutation::RemoveEdge { selector } => {
                self.store.graph_mut().remove_edge(&selector)?;
                self.emit_graph_updated_full(origin);
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::EditEdgeType {
                source_id,
                target_id,
                edge_type,
            } => {
                self.store
                    .graph_mut()
                    .set_edge_type(&source_id, &target_id, edge_type)?;
                self.emit_graph_updated_full(origin);
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::EditStatus {
                kind,
                id,
                status,
                run_id,
            } => self.apply_edit_status(kind, &id, &status, run_id, origin),
            Mutation::EditPosition { node_id, x, y } => {
                let node = self
                    .store
                    .graph_mut()
                    .node_mut(&node_id)
                    .ok_or_else(|| WorkgraphError::NodeNotFound(node_id.clone()))?;
                if node.x == x && node.y == y {
                    return Ok((ApplyOutcome::Applied, false));
                }
                node.x = x;
                node.y = y;
                self.emit_graph_updated_delta(origin, json!({"node_id": node_id}));
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::EditLabel { node_id, label } => {
                let node = self
                    .store
                    .graph_mut()
                    .node_mut(&node_id)
                    .ok_or_else(|| WorkgraphError::NodeNotFound(node_id.clone()))?;
                if node.label == label {
                    return Ok((ApplyOutcome::Applied, false));
                }
                node.label = label;
                self.emit_graph_updated_delta(origin, json!({"node_id": node_id}));
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::EditWrapper { wrapper } => {
                if self.store.graph().wrapper == wrapper {
                    return Ok((ApplyOutcome::Applied, false));
                }
                self.store.graph_mut().wrapper = wrapper;
                self.emit_graph_updated_delta(origin, json!({"wrapper": true}));
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::SaveNodeLog { node_id, log } => {
                let node = self
                    .store
                    .graph_mut()
                    .node_mut(&node_id)
                    .ok_or_else(|| WorkgraphError::NodeNotFound(node_id.clone()))?;
                node.log = log;
                self.emit_graph_updated_delta(origin, json!({"node_id": node_id, "log": true}));
                Ok((ApplyOutcome::Applied, true))
            }
            Mutation::StartRun { request } => {
                let plan = match plan_run(self.store.graph(), &self.runs, &request) {
                    Ok(plan) => plan,
                    Err(e) => {
                        self.bus.emit(
                            EventKind::RunRejected,
                            None,
                            None,
                            json!({"origin": origin.as_str(), "error": e.to_string()}),
                        );
                        return Err(e);
                    }
                };
                let run_id = plan.run_id.clone();
                info!(
                    run_id = %run_id,
                    nodes = plan.allowed.len(),
                    roots = ?plan.roots,
                    "run accepted"
                );
                self.runs.register(
                    run_id.clone(),
                    RunState::new(plan.allowed, plan.wrapper),
                );

                let mut ctx =
                    SchedulerCtx::new(self.store.graph_mut(), &mut self.runs, &mut self.bus);
                for root in &plan.roots {
                    // Clear first so failed or previously-ran roots re-enter
                    // cleanly, then transition to run.
                    if let Some(node) = ctx.graph.node_mut(root) {
                        node.status = NodeStatus::Idle;
                    }
                    ctx.runs.release(root);
                    ctx.enter_run(root, Some(&run_id));
                }
                self.emit_graph_updated_full(origin);
                Ok((ApplyOutcome::RunStarted { run_id }, true))
            }
            Mutation::CancelRuns => {
                let had_runs = !self.runs.is_empty();
                let mut ctx =
                    SchedulerCtx::new(self.store.graph_mut(), &mut self.runs, &mut self.bus);
                ctx.cancel_all_runs();
                if had_runs {
                    self.emit_graph_updated_full(origin);
                }
                Ok((ApplyOutcome::Applied, had_runs))
            }
            Mutation::AckStorage => {
                if !self.suspended {
                    return Ok((ApplyOutcome::Applied, false));
                }
                self.store.save()?;
                self.suspended = false;
                info!("storage acknowledged; mutations resumed");
                Ok((ApplyOutcome::Applied, false))
            }
            Mutation::Checkpoint => Ok((
                ApplyOutcome::Snapshot(Box::new(self.store.snapshot())),
                false,
            )),
            Mutation::GetNodeLog { node_id } => {
                let node = self
                    .store
                    .graph()
                    .node(&node_id)
                    .ok_or_else(|| WorkgraphError::NodeNotFound(node_id.clone()))?;
                Ok((ApplyOutcome::NodeLog(node.log.clone()), false))
            }
        }
    }

    fn apply_edit_status(
        &mut self,
        kind: ElementKind,
        id: &str,
        status: &str,
        run_id: Option<String>,
        origin: &Origin,
    ) -> Result<(ApplyOutcome, bool)> {
        // Callbacks for runs that are no longer active are discarded.
        if let Some(ref rid) = run_id {
            if !self.runs.contains(rid) {
                tracing::debug!(
                    run_id = %rid,
                    id,
                    "status callback for inactive run; discarding"
                );
                return Ok((ApplyOutcome::Applied, false));
            }
        }

        match kind {
            ElementKind::Node => {
                let new = NodeStatus::from_str(status).map_err(|_| {
                    WorkgraphError::InvalidStatus {
                        kind: "node".to_string(),
                        status: status.to_string(),
                    }
                })?;
                let old = self
                    .store
                    .graph()
                    .node(id)
                    .map(|n| n.status)
                    .ok_or_else(|| WorkgraphError::NodeNotFound(id.to_string()))?;
                if old == new {
                    return Ok((ApplyOutcome::Applied, false));
                }

                let mut ctx =
                    SchedulerCtx::new(self.store.graph_mut(), &mut self.runs, &mut self.bus);
                if new == NodeStatus::Run {
                    // Entry side effects (claim, clear incoming, NODE_READY)
                    // happen atomically with the transition.
                    if !ctx.enter_run(id, run_id.as_deref()) {
                        return Ok((ApplyOutcome::Applied, false));
                    }
                } else {
                    if let Some(node) = ctx.graph.node_mut(id) {
                        node.status = new;
                    }
                    ctx.on_node_status(id, new, run_id);
                }
                self.emit_graph_updated_delta(
                    origin,
                    json!({"kind": "node", "id": id, "status": status}),
                );
                Ok((ApplyOutcome::Applied, true))
            }
            ElementKind::Edge => {
                let new = EdgeStatus::from_str(status).map_err(|_| {
                    WorkgraphError::InvalidStatus {
                        kind: "edge".to_string(),
                        status: status.to_string(),
                    }
                })?;
                let old = self
                    .store
                    .graph()
                    .edge(id)
                    .map(|e| e.status)
                    .ok_or_else(|| WorkgraphError::EdgeNotFound(id.to_string()))?;
                if old == new {
                    return Ok((ApplyOutcome::Applied, false));
                }
                if let Some(edge) = self.store.graph_mut().edge_mut(id) {
                    edge.status = new;
                }
                if new == EdgeStatus::ToRun {
                    let mut ctx =
                        SchedulerCtx::new(self.store.graph_mut(), &mut self.runs, &mut self.bus);
                    ctx.on_edge_to_run(id, run_id);
                }
                self.emit_graph_updated_delta(
                    origin,
                    json!({"kind": "edge", "id": id, "status": status}),
                );
                Ok((ApplyOutcome::Applied, true))
            }
        }
    }

    fn emit_graph_updated_full(&mut self, origin: &Origin) {
        let doc = self.store.snapshot();
        let payload = match serde_json::to_value(&doc) {
            Ok(mut value) => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("origin".to_string(), json!(origin.as_str()));
                }
                value
            }
            Err(e) => {
                error!(error = %e, "failed to serialize graph snapshot");
                json!({"origin": origin.as_str()})
            }
        };
        self.bus.emit(EventKind::GraphUpdated, None, None, payload);
    }

    fn emit_graph_updated_delta(&mut self, origin: &Origin, delta: serde_json::Value) {
        self.bus.emit(
            EventKind::GraphUpdated,
            None,
            None,
            json!({"origin": origin.as_str(), "delta": delta}),
        );
    }
}
