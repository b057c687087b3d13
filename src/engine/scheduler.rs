// src/engine/scheduler.rs

//! The scheduling state machine on (node-status, edge-status) pairs.
//!
//! Transitions are triggered by `edit_status` mutations applied by the
//! worker; everything here runs synchronously on the worker and mutates the
//! graph, the run registry, and the bus together so that each queue record
//! is one atomic step.

use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::graph::Graph;
use crate::types::{EdgeStatus, EdgeType, NodeId, NodeStatus, RunId};

use super::events::{EventBus, EventKind};
use super::runs::RunRegistry;

/// Mutable view over everything a propagation step may touch.
pub struct SchedulerCtx<'a> {
    pub graph: &'a mut Graph,
    pub runs: &'a mut RunRegistry,
    pub bus: &'a mut EventBus,
}

impl<'a> SchedulerCtx<'a> {
    pub fn new(graph: &'a mut Graph, runs: &'a mut RunRegistry, bus: &'a mut EventBus) -> Self {
        Self { graph, runs, bus }
    }

    /// Transition `node_id` into `run` under `run_id`.
    ///
    /// Side effects (atomic with the transition): claim the node in
    /// `active_node_run`, clear every incoming edge within the run's node
    /// set, emit `NODE_READY`.
    ///
    /// Idempotent when the node is already `run`; dropped when the
    /// re-trigger cap is exhausted or the node is outside the run's set.
    /// Returns whether the transition happened.
    pub fn enter_run(&mut self, node_id: &str, run_id: Option<&str>) -> bool {
        let Some(node) = self.graph.node(node_id) else {
            warn!(node_id = %node_id, "enter_run for unknown node; ignoring");
            return false;
        };
        if node.status == NodeStatus::Run {
            debug!(node_id = %node_id, "node already run; skipping re-entry");
            return false;
        }
        let label = node.label.clone();

        let mut wrapper = self.graph.wrapper.clone();
        if let Some(run_id) = run_id {
            let Some(state) = self.runs.get_mut(run_id) else {
                debug!(node_id = %node_id, run_id = %run_id, "run no longer active; dropping entry");
                return false;
            };
            if !state.nodes.contains(node_id) {
                debug!(node_id = %node_id, run_id = %run_id, "node outside run's allowed set");
                return false;
            }
            if !state.note_trigger(node_id) {
                warn!(
                    node_id = %node_id,
                    run_id = %run_id,
                    "re-trigger cap reached; dropping entry"
                );
                return false;
            }
            if state.wrapper.is_some() {
                wrapper = state.wrapper.clone();
            }
            let allowed = state.nodes.clone();
            self.runs.claim(node_id, run_id);
            self.clear_incoming_within(node_id, &allowed);
        }

        if let Some(node) = self.graph.node_mut(node_id) {
            node.status = NodeStatus::Run;
        }
        self.bus.emit(
            EventKind::NodeReady,
            run_id.map(|r| r.to_string()),
            Some(node_id.to_string()),
            json!({
                "node_id": node_id,
                "label": label,
                "wrapper": wrapper,
                "run_id": run_id,
            }),
        );
        true
    }

    /// State-machine hook for a node status that was just applied.
    ///
    /// `run_id` is the callback's run context; when absent the claimed run
    /// from `active_node_run` is used.
    pub fn on_node_status(&mut self, node_id: &str, status: NodeStatus, run_id: Option<RunId>) {
        let run_id = run_id.or_else(|| self.runs.run_of(node_id).cloned());
        match status {
            NodeStatus::Run => {
                // Entry handled by enter_run; nothing further here.
            }
            NodeStatus::Running => {
                if let Some(ref rid) = run_id {
                    if self.runs.contains(rid) {
                        self.runs.claim(node_id, rid);
                    }
                }
                self.emit_status_event(EventKind::NodeStarted, node_id, status, run_id);
            }
            NodeStatus::Ran => self.on_node_ran(node_id, run_id),
            NodeStatus::Fail => {
                self.runs.release(node_id);
                self.emit_status_event(EventKind::NodeFailed, node_id, status, run_id);
            }
            NodeStatus::Idle => {
                self.runs.release(node_id);
            }
        }
    }

    /// Successful completion: latch outgoing edges within the run, then
    /// evaluate readiness of each latched target.
    fn on_node_ran(&mut self, node_id: &str, run_id: Option<RunId>) {
        let run_id = match run_id.filter(|rid| self.runs.contains(rid)) {
            Some(rid) => rid,
            None => {
                debug!(node_id = %node_id, "ran outside any active run; no propagation");
                self.runs.release(node_id);
                self.emit_status_event(EventKind::NodeFinished, node_id, NodeStatus::Ran, None);
                return;
            }
        };

        let allowed = self
            .runs
            .get(&run_id)
            .map(|s| s.nodes.clone())
            .unwrap_or_default();

        let mut targets: Vec<NodeId> = Vec::new();
        let latch_ids: Vec<(String, NodeId)> = self
            .graph
            .out_edges(node_id)
            .filter(|e| allowed.contains(&e.target))
            .map(|e| (e.id.clone(), e.target.clone()))
            .collect();
        for (edge_id, target) in latch_ids {
            if let Some(edge) = self.graph.edge_mut(&edge_id) {
                edge.status = EdgeStatus::ToRun;
            }
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets.sort();

        self.runs.release(node_id);
        self.emit_status_event(
            EventKind::NodeFinished,
            node_id,
            NodeStatus::Ran,
            Some(run_id.clone()),
        );

        for target in targets {
            self.evaluate_readiness(&target, &run_id);
        }
    }

    /// Hook for an edge whose status just latched `to_run`.
    ///
    /// Also reachable through a direct `edit_status` on the edge; that path
    /// feeds readiness but never clears incoming edges by itself.
    pub fn on_edge_to_run(&mut self, edge_id: &str, run_id: Option<RunId>) {
        let Some(edge) = self.graph.edge(edge_id) else {
            return;
        };
        let (source, target) = (edge.source.clone(), edge.target.clone());
        let run_id = run_id
            .filter(|rid| self.runs.contains(rid))
            .or_else(|| self.runs.run_of(&source).cloned())
            .or_else(|| self.runs.run_of(&target).cloned());
        let Some(run_id) = run_id else {
            debug!(edge_id = %edge_id, "edge latched outside any active run");
            return;
        };
        self.evaluate_readiness(&target, &run_id);
    }

    /// A single in-run non-blocking `to_run` latch triggers the target
    /// immediately; otherwise the target waits for every in-run blocking
    /// edge to latch.
    fn evaluate_readiness(&mut self, target: &str, run_id: &str) {
        let Some(state) = self.runs.get(run_id) else {
            return;
        };
        if !state.nodes.contains(target) {
            return;
        }
        let allowed = state.nodes.clone();

        let incoming: Vec<(EdgeType, EdgeStatus)> = self
            .graph
            .in_edges_within(target, &allowed)
            .map(|e| (e.edge_type, e.status))
            .collect();

        let status = self
            .graph
            .node(target)
            .map(|n| n.status)
            .unwrap_or_default();

        // A node that is pending pickup or mid-execution is never
        // re-entered; completed nodes may re-enter (re-triggering).
        if matches!(status, NodeStatus::Run | NodeStatus::Running) {
            return;
        }

        let non_blocking_latched = incoming
            .iter()
            .any(|(t, s)| *t == EdgeType::NonBlocking && *s == EdgeStatus::ToRun);
        if non_blocking_latched {
            self.enter_run(target, Some(run_id));
            return;
        }

        let blocking: Vec<&(EdgeType, EdgeStatus)> = incoming
            .iter()
            .filter(|(t, _)| *t == EdgeType::Blocking)
            .collect();
        let all_blocking_latched =
            !blocking.is_empty() && blocking.iter().all(|(_, s)| *s == EdgeStatus::ToRun);
        if all_blocking_latched {
            self.enter_run(target, Some(run_id));
        }
    }

    /// Declare finished runs: a run completes when no node of its allowed
    /// set is `run` or `running`. Exactly one `RUN_COMPLETE` per run.
    pub fn completion_sweep(&mut self) {
        for run_id in self.runs.run_ids() {
            let Some(state) = self.runs.get(&run_id) else {
                continue;
            };
            let still_active = state.nodes.iter().any(|n| {
                self.graph
                    .node(n)
                    .map(|node| node.status.is_active())
                    .unwrap_or(false)
            });
            if still_active {
                continue;
            }
            info!(run_id = %run_id, "run complete");
            self.runs.remove(&run_id);
            self.bus.emit(
                EventKind::RunComplete,
                Some(run_id.clone()),
                None,
                json!({"run_id": run_id}),
            );
        }
    }

    /// Cancel every active run: owned `run`/`running` nodes drop to `""`,
    /// in-run edge latches clear, and each run completes.
    pub fn cancel_all_runs(&mut self) {
        for run_id in self.runs.run_ids() {
            let Some(state) = self.runs.get(&run_id) else {
                continue;
            };
            let allowed = state.nodes.clone();
            for node_id in &allowed {
                if let Some(node) = self.graph.node_mut(node_id) {
                    if node.status.is_active() {
                        node.status = NodeStatus::Idle;
                    }
                }
            }
            let latched: Vec<String> = self
                .graph
                .edges()
                .filter(|e| allowed.contains(&e.source) && allowed.contains(&e.target))
                .filter(|e| e.status == EdgeStatus::ToRun)
                .map(|e| e.id.clone())
                .collect();
            for edge_id in latched {
                if let Some(edge) = self.graph.edge_mut(&edge_id) {
                    edge.status = EdgeStatus::Idle;
                }
            }
            info!(run_id = %run_id, "run cancelled");
            self.runs.remove(&run_id);
            self.bus.emit(
                EventKind::RunComplete,
                Some(run_id.clone()),
                None,
                json!({"run_id": run_id, "cancelled": true}),
            );
        }
    }

    fn clear_incoming_within(&mut self, node_id: &str, allowed: &HashSet<NodeId>) {
        let ids: Vec<String> = self
            .graph
            .in_edges_within(node_id, allowed)
            .map(|e| e.id.clone())
            .collect();
        for edge_id in ids {
            if let Some(edge) = self.graph.edge_mut(&edge_id) {
                edge.status = EdgeStatus::Idle;
            }
        }
    }

    fn emit_status_event(
        &mut self,
        kind: EventKind,
        node_id: &str,
        status: NodeStatus,
        run_id: Option<RunId>,
    ) {
        self.bus.emit(
            kind,
            run_id.clone(),
            Some(node_id.to_string()),
            json!({
                "node_id": node_id,
                "status": status.as_str(),
                "run_id": run_id,
            }),
        );
    }
}
