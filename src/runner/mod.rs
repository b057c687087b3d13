// src/runner/mod.rs

//! Runner client: executes ready nodes on behalf of a workspace.
//!
//! The engine never spawns processes itself; it announces `node_ready` over
//! the realtime channel and a runner like this one picks the node up,
//! executes its label under a shell, and reports status and captured output
//! back through the HTTP API.

pub mod client;
pub mod wrapper;

pub use client::RunnerClient;
pub use wrapper::{apply_wrapper, shell_quote};
