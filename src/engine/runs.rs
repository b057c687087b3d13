// src/engine/runs.rs

//! Run bookkeeping: the per-workspace registry of active runs and the
//! deterministic selection performed when a run is created.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{Result, WorkgraphError};
use crate::graph::Graph;
use crate::types::{NodeId, NodeStatus, RunId};

use super::mutation::RunRequest;

/// State of one accepted run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Nodes admissible for propagation; edges leaving this set are ignored.
    pub nodes: HashSet<NodeId>,
    /// Wrapper chosen at run creation (request override or graph attribute).
    pub wrapper: Option<String>,
    /// Always true in this design; retained for legacy semantics.
    pub subset_only: bool,
    /// Times each node entered `run` in this run, for the re-trigger cap.
    retriggers: HashMap<NodeId, usize>,
}

impl RunState {
    pub fn new(nodes: HashSet<NodeId>, wrapper: Option<String>) -> Self {
        Self {
            nodes,
            wrapper,
            subset_only: true,
            retriggers: HashMap::new(),
        }
    }

    /// Record one `run` entry for `node`; false once the cap is exhausted.
    ///
    /// The cap (2x the run's node count) guards non-blocking feedback loops
    /// against runaway re-triggering.
    pub fn note_trigger(&mut self, node: &str) -> bool {
        let cap = 2 * self.nodes.len().max(1);
        let count = self.retriggers.entry(node.to_string()).or_insert(0);
        if *count >= cap {
            return false;
        }
        *count += 1;
        true
    }
}

/// Active runs plus the at-most-one-run-per-node mapping.
#[derive(Debug, Default)]
pub struct RunRegistry {
    active_runs: HashMap<RunId, RunState>,
    active_node_run: HashMap<NodeId, RunId>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.active_runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active_runs.len()
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.active_runs.contains_key(run_id)
    }

    pub fn get(&self, run_id: &str) -> Option<&RunState> {
        self.active_runs.get(run_id)
    }

    pub fn get_mut(&mut self, run_id: &str) -> Option<&mut RunState> {
        self.active_runs.get_mut(run_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RunId, &RunState)> {
        self.active_runs.iter()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.active_runs.keys().cloned().collect()
    }

    pub fn register(&mut self, run_id: RunId, state: RunState) {
        self.active_runs.insert(run_id, state);
    }

    /// Drop a run and every node mapping pointing at it.
    pub fn remove(&mut self, run_id: &str) -> Option<RunState> {
        let state = self.active_runs.remove(run_id)?;
        self.active_node_run.retain(|_, rid| rid != run_id);
        Some(state)
    }

    /// The run currently owning `node`, if any.
    pub fn run_of(&self, node: &str) -> Option<&RunId> {
        self.active_node_run.get(node)
    }

    /// Mark `node` as owned by `run_id`.
    pub fn claim(&mut self, node: &str, run_id: &str) {
        if let Some(previous) = self
            .active_node_run
            .insert(node.to_string(), run_id.to_string())
        {
            if previous != run_id {
                warn!(
                    node_id = %node,
                    previous_run = %previous,
                    run_id = %run_id,
                    "node changed owning run"
                );
            }
        }
    }

    /// Clear `node`'s ownership (terminal transition or explicit clear).
    pub fn release(&mut self, node: &str) {
        self.active_node_run.remove(node);
    }

    /// Whether any node of the graph is `running` under a run other than
    /// `run_id` while being selected again.
    fn busy_elsewhere(&self, graph: &Graph, allowed: &HashSet<NodeId>) -> Option<NodeId> {
        allowed.iter().cloned().find(|n| {
            graph
                .node(n)
                .map(|node| node.status == NodeStatus::Running)
                .unwrap_or(false)
                && self.active_node_run.contains_key(n)
        })
    }
}

/// Everything the worker needs to seed an accepted run.
#[derive(Debug)]
pub struct RunPlan {
    pub run_id: RunId,
    pub allowed: HashSet<NodeId>,
    pub wrapper: Option<String>,
    /// Zero in-degree nodes of the induced blocking subgraph, to be cleared
    /// and transitioned to `run`.
    pub roots: Vec<NodeId>,
}

/// Deterministic selection for a `/run` request.
///
/// 1. Explicit non-empty selection wins.
/// 2. Otherwise any `fail` nodes form the resume set.
/// 3. Otherwise every node.
///
/// Rejections (cycle in the induced blocking subgraph, empty effective
/// selection, node busy under another run) leave the graph and the registry
/// untouched.
pub fn plan_run(graph: &Graph, registry: &RunRegistry, request: &RunRequest) -> Result<RunPlan> {
    let allowed: HashSet<NodeId> = if !request.nodes.is_empty() {
        let existing: HashSet<NodeId> = request
            .nodes
            .iter()
            .filter(|n| graph.node(n).is_some())
            .cloned()
            .collect();
        if existing.is_empty() {
            return Err(WorkgraphError::RunRejected(
                "every selected node is missing".to_string(),
            ));
        }
        existing
    } else {
        let failed: HashSet<NodeId> = graph
            .nodes()
            .filter(|n| n.status == NodeStatus::Fail)
            .map(|n| n.id.clone())
            .collect();
        if !failed.is_empty() {
            info!(count = failed.len(), "resuming from failed nodes");
            failed
        } else {
            graph.node_ids().cloned().collect()
        }
    };

    if allowed.is_empty() {
        return Err(WorkgraphError::RunRejected("graph has no nodes".to_string()));
    }

    if let Some(node) = registry.busy_elsewhere(graph, &allowed) {
        return Err(WorkgraphError::RunRejected(format!(
            "node {node} is running under another active run"
        )));
    }

    if let Some(node) = graph.find_blocking_cycle(Some(&allowed)) {
        return Err(WorkgraphError::RunRejected(format!(
            "blocking subgraph contains a cycle through {node}"
        )));
    }

    let roots = graph.blocking_roots_within(&allowed);
    let run_id = Uuid::new_v4().to_string();
    let wrapper = request.wrapper.clone().or_else(|| graph.wrapper.clone());

    debug!(run_id = %run_id, nodes = allowed.len(), roots = roots.len(), "planned run");

    Ok(RunPlan {
        run_id,
        allowed,
        wrapper,
        roots,
    })
}
