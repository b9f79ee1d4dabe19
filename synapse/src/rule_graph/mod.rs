//! Rule Graph Store
//!
//! An in-memory arena of nodes addressed by stable keys plus a per-node edge
//! index keyed by signal. Upserts are the only mutation entry points and are
//! serialized against concurrent resolutions; a reader that starts after an
//! upsert completes sees the updated graph. Self-modification at runtime is
//! how the graph grows: a dispatch may legally install nodes and edges that
//! subsequent resolutions observe.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::errors::GraphError;
use crate::types::{NodeId, Operation, Signal};

/// A signal-triggered transition out of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub signal: Signal,
    pub target: NodeId,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Edge {
    pub fn new(signal: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            signal: signal.into().to_lowercase(),
            target: target.into(),
            response: None,
            operations: Vec::new(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }
}

/// A graph node: identity, human label, outgoing edges and an optional
/// fallback marker. At most one fallback node exists per graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    #[serde(default)]
    pub is_fallback: bool,
    #[serde(default)]
    pub edges: BTreeMap<Signal, Edge>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_fallback: false,
            edges: BTreeMap::new(),
        }
    }

    pub fn fallback(mut self) -> Self {
        self.is_fallback = true;
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.insert(edge.signal.clone(), edge);
        self
    }
}

/// Deterministic, collision-resistant key derivation for learned nodes.
pub fn derive_node_id(seed: &str) -> NodeId {
    let digest = Sha256::digest(seed.as_bytes());
    let hex = format!("{:x}", digest);
    format!("n-{}", &hex[..12])
}

/// A point-in-time deep copy of the graph, handed to resolvers and
/// validation harnesses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub fallback: Option<NodeId>,
}

impl GraphSnapshot {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<NodeId, Node>,
    fallback: Option<NodeId>,
}

/// Concurrent rule graph store.
#[derive(Debug, Default)]
pub struct RuleGraph {
    inner: RwLock<GraphInner>,
}

impl RuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a snapshot (used by validation harnesses).
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let graph = Self::new();
        for node in snapshot.nodes {
            graph.upsert_node(node);
        }
        graph
    }

    /// Look up the edge for `(node, signal)`. Returns a clone so no lock is
    /// held while the caller acts on the edge.
    pub fn resolve(&self, node_id: &str, signal: &str) -> Option<Edge> {
        let inner = self.inner.read().unwrap();
        inner
            .nodes
            .get(node_id)
            .and_then(|node| node.edges.get(&signal.to_lowercase()))
            .cloned()
    }

    /// Insert or replace a node. A node marked `is_fallback` takes over the
    /// fallback role from any previous holder.
    pub fn upsert_node(&self, node: Node) {
        let mut inner = self.inner.write().unwrap();
        if node.is_fallback {
            if let Some(prev_id) = inner.fallback.take() {
                if prev_id != node.id {
                    if let Some(prev) = inner.nodes.get_mut(&prev_id) {
                        prev.is_fallback = false;
                    }
                }
            }
            inner.fallback = Some(node.id.clone());
        } else if inner.fallback.as_deref() == Some(node.id.as_str()) {
            inner.fallback = None;
        }
        inner.nodes.insert(node.id.clone(), node);
    }

    /// Ensure a node exists, creating a bare one when absent.
    pub fn ensure_node(&self, id: &str, label: &str) {
        let mut inner = self.inner.write().unwrap();
        inner
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| Node::new(id, label));
    }

    /// Insert or replace the edge keyed by `(node_id, edge.signal)`.
    /// Last-write-wins: the previous edge for the same key, if any, is
    /// returned, never kept alongside the new one.
    pub fn upsert_edge(&self, node_id: &str, edge: Edge) -> Result<Option<Edge>, GraphError> {
        let mut inner = self.inner.write().unwrap();
        let node = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        Ok(node.edges.insert(edge.signal.clone(), edge))
    }

    pub fn fallback_node(&self) -> Option<NodeId> {
        self.inner.read().unwrap().fallback.clone()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.inner.read().unwrap().nodes.get(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.nodes.values().map(|n| n.edges.len()).sum()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.read().unwrap();
        let mut nodes: Vec<Node> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot {
            nodes,
            fallback: inner.fallback.clone(),
        }
    }

    /// Load a graph from a YAML seed manifest.
    pub fn load_manifest(path: &Path) -> Result<Self, GraphError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Manifest(format!("read {}: {}", path.display(), e)))?;
        Self::parse_manifest(&raw)
    }

    pub fn parse_manifest(raw: &str) -> Result<Self, GraphError> {
        let manifest: Manifest = serde_yaml::from_str(raw)
            .map_err(|e| GraphError::Manifest(e.to_string()))?;
        let graph = Self::new();
        for spec in manifest.nodes {
            let mut node = Node::new(spec.id.as_str(), spec.label.as_deref().unwrap_or(&spec.id));
            node.is_fallback = spec.fallback;
            for edge_spec in spec.edges {
                let target = edge_spec.target.unwrap_or_else(|| spec.id.clone());
                let mut edge = Edge::new(edge_spec.signal, target);
                edge.response = edge_spec.response;
                edge.operations = edge_spec.ops;
                node.edges.insert(edge.signal.clone(), edge);
            }
            graph.upsert_node(node);
        }
        Ok(graph)
    }
}

/// On-disk manifest shape (`graph.yaml`).
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    nodes: Vec<ManifestNode>,
}

#[derive(Debug, Deserialize)]
struct ManifestNode {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    fallback: bool,
    #[serde(default)]
    edges: Vec<ManifestEdge>,
}

#[derive(Debug, Deserialize)]
struct ManifestEdge {
    signal: String,
    /// Absent target means the edge routes back to its own node.
    #[serde(default)]
    target: Option<NodeId>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    ops: Vec<Operation>,
}
