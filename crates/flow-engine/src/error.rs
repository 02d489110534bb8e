//! Error types for the flow engine

use thiserror::Error;

use crate::types::{EdgeRole, GraphId, NodeId};

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur in the flow engine
///
/// Structural errors (duplicate ids, unknown references, cycles, occupied
/// roles) are raised synchronously to the mutating caller and are never
/// partially applied. Per-node computation errors are captured in the run
/// report and do not escape `run_graph`.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Node id already exists in the graph
    #[error("Node {0} already exists in the graph")]
    DuplicateNode(NodeId),

    /// Node id does not exist in the graph
    #[error("Node {0} does not exist in the graph")]
    UnknownNode(NodeId),

    /// Graph id already registered
    #[error("Graph {0} already exists")]
    DuplicateGraph(GraphId),

    /// Graph id not registered
    #[error("Graph {0} does not exist")]
    UnknownGraph(GraphId),

    /// Connecting the two nodes would create a cycle
    #[error("Connecting {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    /// A singleton input role is already connected
    #[error("Input role '{role}' on node {node_id} is already occupied")]
    RoleOccupied { node_id: NodeId, role: EdgeRole },

    /// No edge matches the given endpoints and role
    #[error("No '{role}' edge from {from} to {to}")]
    UnknownEdge {
        from: NodeId,
        to: NodeId,
        role: EdgeRole,
    },

    /// The node is still a draft promise without settings
    #[error("Node {0} has not been finalized with settings")]
    NodeNotFinalized(NodeId),

    /// The node has never produced a result
    #[error("Node {0} has no computed result")]
    NotComputed(NodeId),

    /// Settings rejected by the node's behavior
    #[error("Invalid settings for node type '{node_type}': {message}")]
    InvalidSettings { node_type: String, message: String },

    /// No behavior registered for the node type
    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),

    /// A node's behavior raised during execution
    #[error("Node execution failed: {0}")]
    Computation(String),

    /// The remote dispatch channel is unavailable on every transport
    #[error("Worker transport error: {0}")]
    Transport(String),

    /// A remote result could not be opened as a valid table
    #[error("Result integrity check failed: {0}")]
    Integrity(String),

    /// The run was cancelled
    #[error("Run cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a computation error with a message
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// Create a transport error with a message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
