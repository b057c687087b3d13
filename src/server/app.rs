// src/server/app.rs

//! Router construction and process lifecycle for `workgraph serve`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::engine::events::EventLog;
use crate::graph::JsonFileStorage;
use crate::server::routes::{self, AppState};
use crate::server::workspace::{default_state_dir, WorkspaceRegistry};
use crate::server::bridge;

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub graph_file: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub exit_when_idle: bool,
    pub mutation_timeout_secs: u64,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let workspace = Router::new()
        .route("/get-graph", get(routes::get_graph))
        .route("/get-node-log/{node_id}", get(routes::get_node_log))
        .route("/add-node", post(routes::add_node))
        .route("/remove-node", post(routes::remove_node))
        .route("/add-edge", post(routes::add_edge))
        .route("/remove-edge", post(routes::remove_edge))
        .route("/edit-edge-type", post(routes::edit_edge_type))
        .route("/edit-status", post(routes::edit_status))
        .route("/edit-node-position", post(routes::edit_node_position))
        .route("/edit-node-label", post(routes::edit_node_label))
        .route("/edit-wrapper", post(routes::edit_wrapper))
        .route("/save-node-log", post(routes::save_node_log))
        .route("/run", post(routes::start_run))
        .route("/client-connect", post(routes::client_connect))
        .route("/client-disconnect", post(routes::client_disconnect))
        .route("/ack-storage", post(routes::ack_storage));

    Router::new()
        .route("/healthz", get(routes::health))
        .route("/ws", get(bridge::ws_handler))
        .nest("/workspace/{workspace_id}", workspace)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the server until Ctrl-C (or until idle with `--exit-when-idle`).
///
/// Exits the process with code 2 when the port is already bound.
pub async fn serve(options: ServeOptions) -> Result<()> {
    let shutdown = CancellationToken::new();
    let idle_exit = options.exit_when_idle.then(|| shutdown.clone());

    let event_log = EventLog::new(default_state_dir().join("events.log"));
    let registry = WorkspaceRegistry::new(Arc::new(JsonFileStorage), event_log, idle_exit);

    if let Some(path) = &options.graph_file {
        let id = registry.register_path(path);
        info!(workspace_id = %id, path = %path.display(), "registered workspace");
    }

    let state = Arc::new(AppState {
        registry,
        mutation_timeout: Duration::from_secs(options.mutation_timeout_secs),
    });
    let app = build_router(state);

    let bind = format!("{}:{}", options.host, options.port);
    let listener = match TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            error!(bind = %bind, "port already bound");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };
    info!(bind = %bind, "workgraph listening");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("workgraph shut down");
    Ok(())
}
