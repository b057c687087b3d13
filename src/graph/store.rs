// src/graph/store.rs

//! Graph persistence: an injected storage driver plus the worker-owned store.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::{Result, WorkgraphError};

use super::model::Graph;
use super::node_link::NodeLinkDocument;

/// Abstraction over how a graph reaches disk.
///
/// Production code uses [`JsonFileStorage`]; tests can provide an in-memory
/// implementation or one that fails on demand.
pub trait StorageDriver: Send + Sync {
    fn load(&self, path: &Path) -> Result<Graph>;
    fn save(&self, graph: &Graph, path: &Path) -> Result<()>;
}

/// Node-link JSON on disk, written atomically (temp file + rename).
///
/// A missing file loads as an empty graph; the file appears on first save.
#[derive(Debug, Default)]
pub struct JsonFileStorage;

impl StorageDriver for JsonFileStorage {
    fn load(&self, path: &Path) -> Result<Graph> {
        if !path.exists() {
            debug!(path = %path.display(), "graph file absent; starting empty");
            return Ok(Graph::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading graph file {}", path.display()))?;
        let doc: NodeLinkDocument = serde_json::from_str(&raw)?;
        Ok(doc.into_graph())
    }

    fn save(&self, graph: &Graph, path: &Path) -> Result<()> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating graph directory {}", dir.display()))?;
        }
        let doc = NodeLinkDocument::from_graph(graph);
        let json = serde_json::to_string_pretty(&doc)?;

        // Temp file in the target directory so the rename stays on one
        // filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new(".")))
            .with_context(|| format!("creating temp file next to {}", path.display()))?;
        tmp.write_all(json.as_bytes())
            .context("writing graph temp file")?;
        tmp.persist(path)
            .map_err(|e| WorkgraphError::Storage(format!("renaming over {}: {e}", path.display())))?;
        Ok(())
    }
}

/// The worker-owned graph plus its persistence path and driver.
///
/// No locks: the per-workspace worker is the sole writer.
pub struct GraphStore {
    path: PathBuf,
    graph: Graph,
    driver: Arc<dyn StorageDriver>,
}

impl GraphStore {
    /// Load the graph at `path` through `driver`.
    pub fn open(path: PathBuf, driver: Arc<dyn StorageDriver>) -> Result<Self> {
        let graph = driver.load(&path)?;
        debug!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "opened graph store"
        );
        Ok(Self { path, graph, driver })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Serialize the current graph as a node-link document.
    pub fn snapshot(&self) -> NodeLinkDocument {
        NodeLinkDocument::from_graph(&self.graph)
    }

    /// Persist the current graph, retrying once on failure.
    pub fn save(&self) -> Result<()> {
        match self.driver.save(&self.graph, &self.path) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(
                    path = %self.path.display(),
                    error = %first,
                    "graph save failed; retrying once"
                );
                self.driver.save(&self.graph, &self.path)
            }
        }
    }
}
