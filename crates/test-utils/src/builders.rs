#![allow(dead_code)]

use workgraph::graph::{Edge, Graph, Node};
use workgraph::types::{EdgeStatus, EdgeType, NodeStatus};

/// Builder for workflow graphs with readable, caller-chosen ids.
///
/// Edge ids default to `"source->target"`.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    pub fn node(self, id: &str, label: &str) -> Self {
        self.node_with_status(id, label, NodeStatus::Idle)
    }

    pub fn node_with_status(mut self, id: &str, label: &str, status: NodeStatus) -> Self {
        self.graph.insert_node(Node {
            id: id.to_string(),
            label: label.to_string(),
            status,
            log: String::new(),
            x: "0".to_string(),
            y: "0".to_string(),
        });
        self
    }

    pub fn edge(self, source: &str, target: &str) -> Self {
        self.typed_edge(source, target, EdgeType::Blocking)
    }

    pub fn non_blocking_edge(self, source: &str, target: &str) -> Self {
        self.typed_edge(source, target, EdgeType::NonBlocking)
    }

    pub fn typed_edge(mut self, source: &str, target: &str, edge_type: EdgeType) -> Self {
        self.graph.insert_edge(Edge {
            id: format!("{source}->{target}"),
            source: source.to_string(),
            target: target.to_string(),
            status: EdgeStatus::Idle,
            edge_type,
        });
        self
    }

    pub fn wrapper(mut self, wrapper: &str) -> Self {
        self.graph.wrapper = Some(wrapper.to_string());
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
