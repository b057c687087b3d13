// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque node identifier, unique per workspace.
pub type NodeId = String;

/// Opaque edge identifier, unique per workspace.
pub type EdgeId = String;

/// Run identifier, unique per workspace.
pub type RunId = String;

/// Workspace identifier: hex-encoded 256-bit hash of the graph file path.
pub type WorkspaceId = String;

/// Lifecycle status of a node.
///
/// Serialized as the wire strings `""`, `run`, `running`, `ran`, `fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    /// No status; the node is not participating in any run.
    #[default]
    #[serde(rename = "")]
    Idle,
    /// Eligible for execution; a `NODE_READY` has been emitted.
    #[serde(rename = "run")]
    Run,
    /// A runner reported execution start.
    #[serde(rename = "running")]
    Running,
    /// A runner reported successful exit.
    #[serde(rename = "ran")]
    Ran,
    /// A runner reported non-zero exit.
    #[serde(rename = "fail")]
    Fail,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Idle => "",
            NodeStatus::Run => "run",
            NodeStatus::Running => "running",
            NodeStatus::Ran => "ran",
            NodeStatus::Fail => "fail",
        }
    }

    /// Whether the node counts as busy for completion detection.
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Run | NodeStatus::Running)
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(NodeStatus::Idle),
            "run" => Ok(NodeStatus::Run),
            "running" => Ok(NodeStatus::Running),
            "ran" => Ok(NodeStatus::Ran),
            "fail" => Ok(NodeStatus::Fail),
            other => Err(format!("invalid node status: {other:?}")),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latched readiness of an edge: set when its source reached `ran`, cleared
/// when the target enters `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeStatus {
    #[default]
    #[serde(rename = "")]
    Idle,
    #[serde(rename = "to_run")]
    ToRun,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Idle => "",
            EdgeStatus::ToRun => "to_run",
        }
    }
}

impl FromStr for EdgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(EdgeStatus::Idle),
            "to_run" => Ok(EdgeStatus::ToRun),
            other => Err(format!("invalid edge status: {other:?}")),
        }
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependency semantics of an edge.
///
/// - `Blocking`: the target waits for every incoming blocking edge within the
///   active run to latch `to_run` before entering `run`.
/// - `NonBlocking`: any single `to_run` latch triggers the target
///   immediately; supports re-triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeType {
    #[default]
    #[serde(rename = "blocking")]
    Blocking,
    #[serde(rename = "non-blocking")]
    NonBlocking,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Blocking => "blocking",
            EdgeType::NonBlocking => "non-blocking",
        }
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(EdgeType::Blocking),
            "non-blocking" => Ok(EdgeType::NonBlocking),
            other => Err(format!(
                "invalid edge_type: {other:?} (expected \"blocking\" or \"non-blocking\")"
            )),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which element kind a status edit addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Edge,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Node => f.write_str("node"),
            ElementKind::Edge => f.write_str("edge"),
        }
    }
}
