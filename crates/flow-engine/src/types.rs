//! Core types for flow graphs
//!
//! These types define the structure of a pipeline graph: node and edge
//! identities, input roles, table schemas, cached results, and the
//! declarative `GraphSpec` form used for snapshots and save files.

use serde::{Deserialize, Serialize};

/// Unique identifier for a graph
pub type GraphId = i64;

/// Unique identifier for a node within a graph
pub type NodeId = i64;

/// Role of an input edge on its target node
///
/// Binary operators (joins, fuzzy matches) address their inputs as
/// `left`/`right`; everything else uses `main`. `Left` and `Right` are
/// singleton roles; `Main` accepts multiple ordered connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRole {
    Main,
    Left,
    Right,
}

impl EdgeRole {
    /// Whether at most one edge may occupy this role on a node
    pub fn is_singleton(&self) -> bool {
        matches!(self, EdgeRole::Left | EdgeRole::Right)
    }
}

impl std::fmt::Display for EdgeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeRole::Main => write!(f, "main"),
            EdgeRole::Left => write!(f, "left"),
            EdgeRole::Right => write!(f, "right"),
        }
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id
    pub from: NodeId,
    /// Target node id
    pub to: NodeId,
    /// Input role on the target node
    pub role: EdgeRole,
}

/// A single column in a table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Column name
    pub name: String,
    /// Data type label, opaque to the engine
    pub dtype: String,
}

/// Schema of a tabular result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Create a schema from (name, dtype) pairs
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            fields: pairs
                .into_iter()
                .map(|(name, dtype)| FieldSchema {
                    name: name.to_string(),
                    dtype: dtype.to_string(),
                })
                .collect(),
        }
    }

    /// Column names in order
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// The computed output of a node
///
/// `plan` is the serialized lazy handle produced by the node's behavior;
/// its bytes are opaque to the engine and only meaningful to the external
/// plan evaluator. `sample` and `file_ref` are filled by the
/// materialization step, when one runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Predicted or computed output schema
    pub schema: TableSchema,
    /// Serialized lazy plan (full handle to the data)
    pub plan: Vec<u8>,
    /// Binary columnar preview, when materialized
    pub sample: Option<Vec<u8>>,
    /// Reference to a materialized file, when written
    pub file_ref: Option<String>,
    /// Row count, when counted
    pub row_count: Option<u64>,
}

impl NodeResult {
    pub fn new(schema: TableSchema, plan: Vec<u8>) -> Self {
        Self {
            schema,
            plan,
            sample: None,
            file_ref: None,
            row_count: None,
        }
    }
}

/// Run statistics tracked per node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Whether the node holds a result from a completed run
    pub has_run: bool,
    /// Error message from the most recent failed run
    pub error: Option<String>,
    /// Inactive nodes are skipped by the scheduler
    pub active: bool,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            has_run: false,
            error: None,
            active: true,
        }
    }
}

/// Where a node's materialization step executes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLocation {
    /// Heavy operations go remote, everything else stays local
    #[default]
    Auto,
    /// Always evaluate in-process
    Local,
    /// Always dispatch to the worker
    Remote,
}

/// Whether a graph run materializes previews for every node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Produce a preview sample per node for the editor
    #[default]
    Interactive,
    /// Materialize only where a node demands it
    Batch,
}

/// Per-graph settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSettings {
    pub execution_mode: ExecutionMode,
}

/// Declarative form of a single node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub node_type: String,
    /// `None` while the node is still a draft promise
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub location: ExecutionLocation,
}

/// Declarative form of a whole graph
///
/// This is both the snapshot payload for undo/redo and the save/load file
/// format: settings, edges, and graph settings only. Cached results and
/// run statistics are runtime state and re-derive from fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub id: GraphId,
    pub settings: GraphSettings,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
}
