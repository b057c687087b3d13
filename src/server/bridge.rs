// src/server/bridge.rs

//! Transport bridge: fans a workspace's domain events out to WebSocket
//! clients.
//!
//! Each connection subscribes to one workspace channel at a time; frames
//! for other workspaces are never delivered. Events arrive from the bus in
//! emission order and are forwarded without reordering.

use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::protocol::{frame_for_event, ClientFrame, ErrorFrame};
use crate::server::routes::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    info!("realtime client connected");
    let (ws_tx, mut ws_rx) = socket.split();
    let ws_tx: WsSender = Arc::new(Mutex::new(ws_tx));

    // The active subscription's forwarding task, replaced on re-subscribe.
    let mut forward: Option<JoinHandle<()>> = None;
    // Workspace this connection counted itself into via a `connect` frame.
    let mut counted: Option<String> = None;

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&message) {
            Ok(frame) => frame,
            Err(e) => {
                send_error(&ws_tx, format!("malformed frame: {e}")).await;
                continue;
            }
        };

        match frame.frame_type.as_str() {
            "subscribe" => {
                let Some(workspace_id) = frame.workspace_id else {
                    send_error(&ws_tx, "subscribe requires workspace_id").await;
                    continue;
                };
                let Some(ctx) = state.registry.get(&workspace_id) else {
                    send_error(&ws_tx, format!("unknown workspace: {workspace_id}")).await;
                    continue;
                };
                if let Some(task) = forward.take() {
                    task.abort();
                }
                debug!(workspace_id = %workspace_id, "client subscribed");
                forward = Some(spawn_forwarder(ctx.subscribe(), ws_tx.clone()));
            }
            "connect" => {
                let Some(workspace_id) = frame.workspace_id else {
                    send_error(&ws_tx, "connect requires workspace_id").await;
                    continue;
                };
                let path = frame.path.as_deref().map(Path::new);
                match state.registry.connect(&workspace_id, path) {
                    Ok(_) => counted = Some(workspace_id),
                    Err(e) => send_error(&ws_tx, e.to_string()).await,
                }
            }
            "disconnect" => {
                if let Some(workspace_id) = counted.take() {
                    let _ = state.registry.disconnect(&workspace_id);
                }
            }
            other => {
                send_error(&ws_tx, format!("unknown frame type: {other}")).await;
            }
        }
    }

    if let Some(task) = forward.take() {
        task.abort();
    }
    // A dropped connection releases its client count like an explicit
    // disconnect would.
    if let Some(workspace_id) = counted.take() {
        let _ = state.registry.disconnect(&workspace_id);
    }
    debug!("realtime client disconnected");
}

fn spawn_forwarder(
    mut rx: tokio::sync::broadcast::Receiver<crate::engine::Event>,
    ws_tx: WsSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "realtime subscriber lagged; frames skipped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let Some(frame) = frame_for_event(&event) else {
                continue;
            };
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize realtime frame");
                    continue;
                }
            };
            if ws_tx.lock().await.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    })
}

async fn send_error(ws_tx: &WsSender, error: impl Into<String>) {
    let frame = ErrorFrame::new(error);
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = ws_tx.lock().await.send(Message::Text(text.into())).await;
    }
}
