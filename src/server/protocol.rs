// src/server/protocol.rs

//! Wire frames for the realtime channel.

use serde::{Deserialize, Serialize};

use crate::engine::{Event, EventKind};

/// A frame sent by a client over the realtime channel.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Graph file path; accepted on `connect` to open the workspace.
    #[serde(default)]
    pub path: Option<String>,
}

/// An event frame pushed to subscribed clients.
#[derive(Debug, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub workspace_id: String,
    pub event: &'static str,
    pub payload: serde_json::Value,
}

/// An error frame for malformed or unroutable client frames.
#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub error: String,
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            frame_type: "error",
            error: error.into(),
        }
    }
}

/// Translate a domain event into its client-facing frame.
///
/// Rejection events are engine-internal and have no realtime counterpart.
pub fn frame_for_event(event: &Event) -> Option<ServerFrame> {
    let name = match event.kind {
        EventKind::GraphUpdated => "graph_update",
        EventKind::NodeReady => "node_ready",
        EventKind::NodeStarted | EventKind::NodeFinished | EventKind::NodeFailed => {
            "status_change"
        }
        EventKind::RunComplete => "run_complete",
        EventKind::GraphRejected | EventKind::RunRejected => return None,
    };
    Some(ServerFrame {
        frame_type: "event",
        workspace_id: event.workspace_id.clone(),
        event: name,
        payload: event.payload.clone(),
    })
}
