// src/server/routes.rs

//! Thin HTTP handlers: every state-changing request enqueues a mutation and
//! synchronously awaits its apply latch; reads ride the queue as
//! checkpoints so they observe a worker-acknowledged state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::engine::{ApplyOutcome, Mutation, Origin, RunRequest};
use crate::errors::WorkgraphError;
use crate::graph::EdgeSelector;
use crate::server::workspace::{WorkspaceContext, WorkspaceRegistry};
use crate::types::{EdgeType, ElementKind};

pub struct AppState {
    pub registry: Arc<WorkspaceRegistry>,
    pub mutation_timeout: Duration,
}

/// Error wrapper mapping domain errors onto HTTP status codes.
pub struct ApiError(WorkgraphError);

impl From<WorkgraphError> for ApiError {
    fn from(e: WorkgraphError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WorkgraphError::NodeNotFound(_)
            | WorkgraphError::EdgeNotFound(_)
            | WorkgraphError::WorkspaceNotFound(_) => StatusCode::NOT_FOUND,
            WorkgraphError::InvalidStatus { .. }
            | WorkgraphError::MissingEndpoint { .. }
            | WorkgraphError::EdgeExists { .. }
            | WorkgraphError::BlockingCycle(_)
            | WorkgraphError::Json(_) => StatusCode::BAD_REQUEST,
            WorkgraphError::RunRejected(_) => StatusCode::CONFLICT,
            WorkgraphError::MutationTimeout => StatusCode::GATEWAY_TIMEOUT,
            WorkgraphError::StorageSuspended => StatusCode::SERVICE_UNAVAILABLE,
            WorkgraphError::Storage(_) | WorkgraphError::Io(_) | WorkgraphError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn lookup(state: &AppState, workspace_id: &str) -> Result<Arc<WorkspaceContext>, ApiError> {
    state
        .registry
        .get(workspace_id)
        .ok_or_else(|| ApiError(WorkgraphError::WorkspaceNotFound(workspace_id.to_string())))
}

fn origin_from(tag: Option<String>) -> Origin {
    match tag {
        Some(tag) if tag.starts_with("runner") => Origin::Runner(tag),
        Some(tag) => Origin::Client(tag),
        None => Origin::Client("http".to_string()),
    }
}

async fn apply(
    state: &AppState,
    workspace_id: &str,
    origin: Origin,
    mutation: Mutation,
) -> Result<ApplyOutcome, ApiError> {
    let ctx = lookup(state, workspace_id)?;
    Ok(ctx.apply(origin, mutation, state.mutation_timeout).await?)
}

// GET /healthz
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

// GET /workspace/{id}/get-graph
pub async fn get_graph(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
) -> ApiResult {
    match apply(&state, &workspace_id, Origin::Client("http".into()), Mutation::Checkpoint).await? {
        ApplyOutcome::Snapshot(doc) => Ok(Json(serde_json::to_value(&*doc).map_err(WorkgraphError::from)?)),
        _ => Err(unexpected_outcome()),
    }
}

// GET /workspace/{id}/get-node-log/{node_id}
pub async fn get_node_log(
    State(state): State<Arc<AppState>>,
    UrlPath((workspace_id, node_id)): UrlPath<(String, String)>,
) -> ApiResult {
    match apply(
        &state,
        &workspace_id,
        Origin::Client("http".into()),
        Mutation::GetNodeLog { node_id },
    )
    .await?
    {
        ApplyOutcome::NodeLog(log) => Ok(Json(json!({"log": log}))),
        _ => Err(unexpected_outcome()),
    }
}

#[derive(Deserialize)]
pub struct AddNodeBody {
    pub label: String,
    #[serde(default)]
    pub x: String,
    #[serde(default)]
    pub y: String,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/add-node
pub async fn add_node(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<AddNodeBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    match apply(
        &state,
        &workspace_id,
        origin,
        Mutation::AddNode {
            label: body.label,
            x: body.x,
            y: body.y,
        },
    )
    .await?
    {
        ApplyOutcome::NodeCreated { node_id } => Ok(Json(json!({"node_id": node_id}))),
        _ => Err(unexpected_outcome()),
    }
}

#[derive(Deserialize)]
pub struct NodeIdBody {
    pub node_id: String,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/remove-node
pub async fn remove_node(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<NodeIdBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::RemoveNode {
            node_id: body.node_id,
        },
    )
    .await?;
    Ok(Json(json!({"status": "removed"})))
}

#[derive(Deserialize)]
pub struct AddEdgeBody {
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub edge_type: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/add-edge
pub async fn add_edge(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<AddEdgeBody>,
) -> ApiResult {
    let edge_type = parse_edge_type(body.edge_type.as_deref())?;
    let origin = origin_from(body.origin);
    match apply(
        &state,
        &workspace_id,
        origin,
        Mutation::AddEdge {
            source_id: body.source_id,
            target_id: body.target_id,
            edge_type,
        },
    )
    .await?
    {
        ApplyOutcome::EdgeCreated { edge_id } => Ok(Json(json!({"edge_id": edge_id}))),
        _ => Err(unexpected_outcome()),
    }
}

#[derive(Deserialize)]
pub struct RemoveEdgeBody {
    #[serde(default)]
    pub edge_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/remove-edge
pub async fn remove_edge(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<RemoveEdgeBody>,
) -> ApiResult {
    let selector = match (body.edge_id, body.source_id, body.target_id) {
        (Some(id), _, _) => EdgeSelector::ById(id),
        (None, Some(source), Some(target)) => EdgeSelector::ByEndpoints { source, target },
        _ => {
            return Err(ApiError(WorkgraphError::EdgeNotFound(
                "remove-edge needs edge_id or source_id + target_id".to_string(),
            )))
        }
    };
    let origin = origin_from(body.origin);
    apply(&state, &workspace_id, origin, Mutation::RemoveEdge { selector }).await?;
    Ok(Json(json!({"status": "removed"})))
}

#[derive(Deserialize)]
pub struct EditEdgeTypeBody {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/edit-edge-type
pub async fn edit_edge_type(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<EditEdgeTypeBody>,
) -> ApiResult {
    let edge_type = parse_edge_type(Some(&body.edge_type))?;
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::EditEdgeType {
            source_id: body.source_id,
            target_id: body.target_id,
            edge_type,
        },
    )
    .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct EditStatusBody {
    pub kind: ElementKind,
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/edit-status
pub async fn edit_status(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<EditStatusBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::EditStatus {
            kind: body.kind,
            id: body.id,
            status: body.status,
            run_id: body.run_id,
        },
    )
    .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct EditPositionBody {
    pub node_id: String,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/edit-node-position
pub async fn edit_node_position(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<EditPositionBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::EditPosition {
            node_id: body.node_id,
            x: body.x,
            y: body.y,
        },
    )
    .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct EditLabelBody {
    pub node_id: String,
    pub label: String,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/edit-node-label
pub async fn edit_node_label(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<EditLabelBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::EditLabel {
            node_id: body.node_id,
            label: body.label,
        },
    )
    .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct EditWrapperBody {
    #[serde(default)]
    pub wrapper: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/edit-wrapper
pub async fn edit_wrapper(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<EditWrapperBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::EditWrapper {
            wrapper: body.wrapper,
        },
    )
    .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize)]
pub struct SaveNodeLogBody {
    pub node_id: String,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/save-node-log
pub async fn save_node_log(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    Json(body): Json<SaveNodeLogBody>,
) -> ApiResult {
    let origin = origin_from(body.origin);
    apply(
        &state,
        &workspace_id,
        origin,
        Mutation::SaveNodeLog {
            node_id: body.node_id,
            log: body.log,
        },
    )
    .await?;
    Ok(Json(json!({"status": "updated"})))
}

#[derive(Deserialize, Default)]
pub struct RunBody {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub wrapper: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

// POST /workspace/{id}/run
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    body: Bytes,
) -> ApiResult {
    let body: RunBody = parse_optional_body(&body)?;
    let origin = origin_from(body.origin);
    match apply(
        &state,
        &workspace_id,
        origin,
        Mutation::StartRun {
            request: RunRequest {
                nodes: body.nodes,
                wrapper: body.wrapper,
            },
        },
    )
    .await?
    {
        ApplyOutcome::RunStarted { run_id } => {
            Ok(Json(json!({"status": "started", "run_id": run_id})))
        }
        _ => Err(unexpected_outcome()),
    }
}

#[derive(Deserialize, Default)]
pub struct ConnectBody {
    #[serde(default)]
    pub path: Option<String>,
}

// POST /workspace/{id}/client-connect
pub async fn client_connect(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
    body: Bytes,
) -> ApiResult {
    let body: ConnectBody = parse_optional_body(&body)?;
    let path = body.path.as_deref().map(Path::new);
    let ctx = state.registry.connect(&workspace_id, path)?;
    Ok(Json(json!({"clients": ctx.client_count()})))
}

// POST /workspace/{id}/client-disconnect
pub async fn client_disconnect(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
) -> ApiResult {
    let clients = state.registry.disconnect(&workspace_id)?;
    Ok(Json(json!({"clients": clients})))
}

// POST /workspace/{id}/ack-storage
pub async fn ack_storage(
    State(state): State<Arc<AppState>>,
    UrlPath(workspace_id): UrlPath<String>,
) -> ApiResult {
    apply(
        &state,
        &workspace_id,
        Origin::Client("http".into()),
        Mutation::AckStorage,
    )
    .await?;
    Ok(Json(json!({"status": "resumed"})))
}

/// An absent body reads as the default; a present one must be valid JSON.
fn parse_optional_body<T: serde::de::DeserializeOwned + Default>(
    body: &Bytes,
) -> Result<T, ApiError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError(WorkgraphError::Json(e)))
}

fn parse_edge_type(raw: Option<&str>) -> Result<EdgeType, ApiError> {
    match raw {
        None => Ok(EdgeType::Blocking),
        Some(s) => s.parse().map_err(|_| {
            ApiError(WorkgraphError::InvalidStatus {
                kind: "edge_type".to_string(),
                status: s.to_string(),
            })
        }),
    }
}

fn unexpected_outcome() -> ApiError {
    ApiError(WorkgraphError::Other(anyhow::anyhow!(
        "unexpected apply outcome"
    )))
}
