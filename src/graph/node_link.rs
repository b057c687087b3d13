// src/graph/node_link.rs

//! Node-link JSON document: the on-disk and on-the-wire graph shape.
//!
//! Backward compatibility: links without `edge_type` read as `blocking`;
//! absent `status`, `log`, `x`, `y` read as empty.

use serde::{Deserialize, Serialize};

use crate::types::{EdgeStatus, EdgeType, NodeStatus};

use super::model::{Edge, Graph, Node};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeLinkDocument {
    #[serde(default)]
    pub graph: GraphAttrs,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub x: String,
    #[serde(default)]
    pub y: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub status: EdgeStatus,
    #[serde(default)]
    pub edge_type: EdgeType,
}

impl NodeLinkDocument {
    pub fn from_graph(graph: &Graph) -> Self {
        let mut nodes: Vec<NodeRecord> = graph
            .nodes()
            .map(|n| NodeRecord {
                id: n.id.clone(),
                label: n.label.clone(),
                status: n.status,
                log: n.log.clone(),
                x: n.x.clone(),
                y: n.y.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut links: Vec<LinkRecord> = graph
            .edges()
            .map(|e| LinkRecord {
                id: e.id.clone(),
                source: e.source.clone(),
                target: e.target.clone(),
                status: e.status,
                edge_type: e.edge_type,
            })
            .collect();
        links.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            graph: GraphAttrs {
                wrapper: graph.wrapper.clone(),
            },
            nodes,
            links,
        }
    }

    pub fn into_graph(self) -> Graph {
        let mut graph = Graph::new();
        graph.wrapper = self.graph.wrapper;
        for record in self.nodes {
            graph.insert_node(Node {
                id: record.id,
                label: record.label,
                status: record.status,
                log: record.log,
                x: record.x,
                y: record.y,
            });
        }
        for record in self.links {
            graph.insert_edge(Edge {
                id: record.id,
                source: record.source,
                target: record.target,
                status: record.status,
                edge_type: record.edge_type,
            });
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_links_without_edge_type_read_as_blocking() {
        let raw = r#"{
            "graph": {},
            "nodes": [
                {"id": "a", "label": "echo a"},
                {"id": "b", "label": "echo b", "status": "fail"}
            ],
            "links": [
                {"id": "e1", "source": "a", "target": "b"}
            ]
        }"#;
        let doc: NodeLinkDocument = serde_json::from_str(raw).unwrap();
        let graph = doc.into_graph();

        let edge = graph.edge("e1").unwrap();
        assert_eq!(edge.edge_type, EdgeType::Blocking);
        assert_eq!(edge.status, EdgeStatus::Idle);
        assert_eq!(graph.node("b").unwrap().status, NodeStatus::Fail);
        assert_eq!(graph.node("a").unwrap().log, "");
        assert!(graph.wrapper.is_none());
    }

    #[test]
    fn wrapper_and_edge_type_survive_serialization() {
        let mut graph = Graph::new();
        graph.wrapper = Some("bash -lc {}".to_string());
        let a = graph.add_node("echo a", "10", "20");
        let b = graph.add_node("echo b", "30", "40");
        graph.add_edge(&a, &b, EdgeType::NonBlocking).unwrap();

        let json = serde_json::to_string(&NodeLinkDocument::from_graph(&graph)).unwrap();
        let restored: NodeLinkDocument = serde_json::from_str(&json).unwrap();
        let restored = restored.into_graph();

        assert_eq!(restored.wrapper.as_deref(), Some("bash -lc {}"));
        assert_eq!(
            restored.find_edge(&a, &b).unwrap().edge_type,
            EdgeType::NonBlocking
        );
        assert_eq!(restored.node(&a).unwrap().x, "10");
    }
}
