//! Pipeline nodes and content fingerprinting
//!
//! Nodes are created through a two-phase promise -> finalize protocol: a
//! placeholder carrying only id and type is registered first, then
//! configured with settings. Draft nodes can be wired into the graph but
//! never executed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::{Edge, EdgeRole, ExecutionLocation, NodeId, NodeResult, NodeSpec, RunStats};

/// Construction stage of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeStage {
    /// Promise: id and type registered, settings pending
    Draft,
    /// Fully configured and eligible for execution
    Configured { settings: serde_json::Value },
}

/// A placeholder registration for a node
#[derive(Debug, Clone)]
pub struct NodePromise {
    pub id: NodeId,
    pub node_type: String,
}

impl NodePromise {
    pub fn new(id: NodeId, node_type: impl Into<String>) -> Self {
        Self {
            id,
            node_type: node_type.into(),
        }
    }
}

/// A cached result together with the fingerprint it was computed under
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub fingerprint: u64,
    pub data: NodeResult,
}

/// One pipeline step
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub node_type: String,
    pub stage: NodeStage,
    /// Ordered input edges; every edge has `to == self.id`
    pub inputs: Vec<Edge>,
    pub location: ExecutionLocation,
    pub result: Option<CachedResult>,
    pub stats: RunStats,
}

impl Node {
    /// Create a draft node from a promise
    pub fn from_promise(promise: NodePromise) -> Self {
        Self {
            id: promise.id,
            node_type: promise.node_type,
            stage: NodeStage::Draft,
            inputs: Vec::new(),
            location: ExecutionLocation::default(),
            result: None,
            stats: RunStats::default(),
        }
    }

    /// Finalize a draft with settings; re-finalizing replaces the settings
    pub fn finalize(&mut self, settings: serde_json::Value) {
        self.stage = NodeStage::Configured { settings };
    }

    pub fn is_draft(&self) -> bool {
        matches!(self.stage, NodeStage::Draft)
    }

    /// Settings, if the node has been finalized
    pub fn settings(&self) -> Option<&serde_json::Value> {
        match &self.stage {
            NodeStage::Draft => None,
            NodeStage::Configured { settings } => Some(settings),
        }
    }

    /// Settings or a not-finalized error
    pub fn require_settings(&self) -> Result<&serde_json::Value> {
        self.settings().ok_or(FlowError::NodeNotFinalized(self.id))
    }

    /// Whether an edge with the given singleton role is already present
    pub fn role_occupied(&self, role: &EdgeRole) -> bool {
        role.is_singleton() && self.inputs.iter().any(|e| e.role == *role)
    }

    /// Hash of this node's own configuration, independent of its inputs
    ///
    /// serde_json maps serialize with sorted keys, so the byte form is
    /// canonical for equal settings values.
    pub fn settings_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.node_type.hash(&mut hasher);
        match self.settings() {
            Some(settings) => {
                // Draft vs configured must never collide
                1u8.hash(&mut hasher);
                if let Ok(bytes) = serde_json::to_vec(settings) {
                    bytes.hash(&mut hasher);
                }
            }
            None => 0u8.hash(&mut hasher),
        }
        hasher.finish()
    }

    /// Combine the settings hash with the fingerprints of direct inputs
    pub fn fingerprint_with(&self, input_fingerprints: &[(EdgeRole, u64)]) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.settings_hash().hash(&mut hasher);
        for (role, fp) in input_fingerprints {
            role.hash(&mut hasher);
            fp.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Adopt a completed result computed under the given fingerprint
    pub fn store_result(&mut self, fingerprint: u64, data: NodeResult) {
        self.result = Some(CachedResult { fingerprint, data });
        self.stats.has_run = true;
        self.stats.error = None;
    }

    /// Record a failed run without touching any cached result
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.stats.error = Some(message.into());
    }

    /// Declarative form of this node
    pub fn to_spec(&self) -> NodeSpec {
        NodeSpec {
            id: self.id,
            node_type: self.node_type.clone(),
            settings: self.settings().cloned(),
            location: self.location,
        }
    }

    /// Rebuild a node from its declarative form
    pub fn from_spec(spec: NodeSpec) -> Self {
        let stage = match spec.settings {
            Some(settings) => NodeStage::Configured { settings },
            None => NodeStage::Draft,
        };
        Self {
            id: spec.id,
            node_type: spec.node_type,
            stage,
            inputs: Vec::new(),
            location: spec.location,
            result: None,
            stats: RunStats::default(),
        }
    }
}
