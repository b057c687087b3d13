// src/runner/client.rs

//! The runner client: subscribes to a workspace, reacts to `node_ready`,
//! spawns shell commands, and reports status and logs back to the server.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::server::workspace::workspace_id_for_path;
use crate::types::{RunId, WorkspaceId};

use super::wrapper::apply_wrapper;

/// Frame shape of interest on the realtime channel.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NodeReadyPayload {
    node_id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    wrapper: Option<String>,
    #[serde(default)]
    run_id: Option<RunId>,
}

pub struct RunnerClient {
    base_url: String,
    ws_url: String,
    workspace_id: WorkspaceId,
    graph_path: PathBuf,
    wrapper: Option<String>,
    http: reqwest::Client,
}

impl RunnerClient {
    pub fn new(host: &str, port: u16, graph_path: PathBuf, wrapper: Option<String>) -> Self {
        let workspace_id = workspace_id_for_path(&graph_path);
        Self {
            base_url: format!("http://{host}:{port}"),
            ws_url: format!("ws://{host}:{port}/ws"),
            workspace_id,
            graph_path,
            wrapper,
            http: reqwest::Client::new(),
        }
    }

    /// Connect, trigger a run, execute `node_ready` nodes until the run
    /// completes.
    pub async fn run(&self, nodes: Vec<String>) -> Result<()> {
        let (ws, _) = connect_async(&self.ws_url)
            .await
            .with_context(|| format!("connecting to {}", self.ws_url))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Register as a client (opens the workspace) and subscribe to its
        // channel before triggering the run, so no node_ready is missed.
        self.post(
            "client-connect",
            json!({"path": self.graph_path.to_string_lossy()}),
        )
        .await?;
        ws_tx
            .send(Message::text(
                json!({"type": "subscribe", "workspace_id": self.workspace_id}).to_string(),
            ))
            .await?;

        let run_id = self.start_run(&nodes).await?;
        info!(run_id = %run_id, "run started; waiting for ready nodes");

        while let Some(message) = ws_rx.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let frame: IncomingFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable frame");
                    continue;
                }
            };
            if frame.frame_type != "event" {
                continue;
            }
            match frame.event.as_deref() {
                Some("node_ready") => {
                    let payload: NodeReadyPayload = match serde_json::from_value(frame.payload) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "invalid node_ready payload");
                            continue;
                        }
                    };
                    if payload.run_id.as_deref() != Some(run_id.as_str()) {
                        debug!(node_id = %payload.node_id, "node_ready for another run; ignoring");
                        continue;
                    }
                    self.execute_node(&payload, &run_id).await;
                }
                Some("run_complete") => {
                    let complete_id = frame
                        .payload
                        .get("run_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    if complete_id == run_id {
                        info!(run_id = %run_id, "run complete; disconnecting");
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Err(e) = self.post("client-disconnect", json!({})).await {
            warn!(error = %e, "failed to notify server of disconnect");
        }
        Ok(())
    }

    async fn start_run(&self, nodes: &[String]) -> Result<RunId> {
        let response = self
            .post("run", json!({"nodes": nodes, "wrapper": self.wrapper}))
            .await?;
        response
            .get("run_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .context("server returned no run_id")
    }

    /// Execute one node: set `running`, spawn the command, save the log,
    /// set `ran` or `fail`.
    async fn execute_node(&self, payload: &NodeReadyPayload, run_id: &str) {
        let node_id = &payload.node_id;
        info!(node_id = %node_id, label = %payload.label, "executing node");

        let wrapper = payload.wrapper.as_deref().or(self.wrapper.as_deref());
        let command = apply_wrapper(wrapper, &payload.label);

        self.set_status(node_id, "running", run_id).await;

        if command.trim().is_empty() {
            self.save_log(node_id, "").await;
            self.set_status(node_id, "ran", run_id).await;
            return;
        }

        let output = spawn_shell(&command).await;
        match output {
            Ok(output) => {
                let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
                log.push_str(&String::from_utf8_lossy(&output.stderr));
                self.save_log(node_id, &log).await;

                if output.status.success() {
                    info!(node_id = %node_id, "node completed");
                    self.set_status(node_id, "ran", run_id).await;
                } else {
                    warn!(
                        node_id = %node_id,
                        exit_code = output.status.code().unwrap_or(-1),
                        "node failed"
                    );
                    self.set_status(node_id, "fail", run_id).await;
                }
            }
            Err(e) => {
                error!(node_id = %node_id, error = %e, "failed to spawn node command");
                self.save_log(node_id, &format!("[runner error] {e}")).await;
                self.set_status(node_id, "fail", run_id).await;
            }
        }
    }

    async fn set_status(&self, node_id: &str, status: &str, run_id: &str) {
        let body = json!({
            "kind": "node",
            "id": node_id,
            "status": status,
            "run_id": run_id,
            "origin": format!("runner:{run_id}"),
        });
        if let Err(e) = self.post("edit-status", body).await {
            error!(node_id = %node_id, status, error = %e, "failed to report status");
        }
    }

    async fn save_log(&self, node_id: &str, log: &str) {
        let body = json!({
            "node_id": node_id,
            "log": log,
            "origin": "runner",
        });
        if let Err(e) = self.post("save-node-log", body).await {
            error!(node_id = %node_id, error = %e, "failed to save node log");
        }
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!(
            "{}/workspace/{}/{endpoint}",
            self.base_url, self.workspace_id
        );
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        let value: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{url} returned {status}: {value}");
        }
        Ok(value)
    }
}

/// Spawn `command` under the platform shell with piped output.
async fn spawn_shell(command: &str) -> std::io::Result<std::process::Output> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.output().await
}
