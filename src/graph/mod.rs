// src/graph/mod.rs

//! In-memory workflow graph and its persistence.
//!
//! The graph is an arena of nodes and a separate edge table; adjacency is
//! derived on demand. Mutation is the sole privilege of the per-workspace
//! worker, so the structures here carry no locks.

pub mod model;
pub mod node_link;
pub mod store;

pub use model::{Edge, EdgeSelector, Graph, Node};
pub use store::{GraphStore, JsonFileStorage, StorageDriver};
