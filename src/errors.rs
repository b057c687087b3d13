// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkgraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("edge not found: {0}")]
    EdgeNotFound(String),

    #[error("edge already exists: {source_id} -> {target_id}")]
    EdgeExists { source_id: String, target_id: String },

    #[error("both source and target must exist: {source_id} -> {target_id}")]
    MissingEndpoint { source_id: String, target_id: String },

    #[error("invalid status {status:?} for {kind}")]
    InvalidStatus { kind: String, status: String },

    #[error("cycle in blocking subgraph: {0}")]
    BlockingCycle(String),

    #[error("run rejected: {0}")]
    RunRejected(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("mutation timed out waiting for the graph worker")]
    MutationTimeout,

    #[error("mutations suspended after a storage failure; acknowledge to resume")]
    StorageSuspended,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WorkgraphError>;
