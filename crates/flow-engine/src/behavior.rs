//! Node behaviors and the behavior registry
//!
//! A `NodeBehavior` is the pluggable implementation of one node type:
//! settings validation, schema prediction, and plan construction. The
//! scheduler depends only on this interface, never on concrete node
//! types. Behaviors build lazy plans; the plan bytes are opaque to the
//! engine and only meaningful to the external plan evaluator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::{FlowError, Result};
use crate::evaluator::OperationType;
use crate::types::{EdgeRole, NodeId, NodeResult, TableSchema};

/// One resolved input of a node at execution time
#[derive(Debug, Clone, Copy)]
pub struct BehaviorInput<'a> {
    pub role: EdgeRole,
    pub node_id: NodeId,
    pub result: &'a NodeResult,
}

/// Everything a behavior sees while executing
pub struct BehaviorContext<'a> {
    pub node_id: NodeId,
    pub settings: &'a serde_json::Value,
    /// Inputs in connection order
    pub inputs: &'a [BehaviorInput<'a>],
    pub cancel: &'a CancelToken,
}

impl<'a> BehaviorContext<'a> {
    /// First input with the given role, if connected
    pub fn input(&self, role: EdgeRole) -> Option<&'a NodeResult> {
        self.inputs
            .iter()
            .find(|i| i.role == role)
            .map(|i| i.result)
    }

    /// First input with the given role, or a computation error
    pub fn require_input(&self, role: EdgeRole) -> Result<&'a NodeResult> {
        self.input(role).ok_or_else(|| {
            FlowError::computation(format!(
                "node {} is missing its '{}' input",
                self.node_id, role
            ))
        })
    }

    /// Schemas of all inputs, in connection order
    pub fn input_schemas(&self) -> Vec<TableSchema> {
        self.inputs.iter().map(|i| i.result.schema.clone()).collect()
    }
}

/// The pluggable implementation of one node type
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Type tag this behavior handles (e.g. "filter")
    fn node_type(&self) -> &str;

    /// Reject malformed settings before they enter the graph
    fn validate_settings(&self, settings: &serde_json::Value) -> Result<()>;

    /// Predict the output schema from settings and input schemas
    fn predict_schema(
        &self,
        settings: &serde_json::Value,
        inputs: &[TableSchema],
    ) -> Result<TableSchema>;

    /// Build the node's result: output schema plus the serialized lazy plan
    async fn execute(&self, cx: BehaviorContext<'_>) -> Result<NodeResult>;

    /// The heavy operation this node requires, if any
    ///
    /// Nodes returning `Some` are eligible for remote dispatch when their
    /// execution location is `Auto`; `None` marks a cheap node.
    fn heavy_operation(&self) -> Option<OperationType> {
        None
    }

    /// Input roles this node accepts
    fn accepted_roles(&self) -> &[EdgeRole] {
        &[EdgeRole::Main]
    }
}

/// Registry of node behaviors, keyed by node type
///
/// An explicit object owned by the application context; there are no
/// process-wide behavior singletons.
#[derive(Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn NodeBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    /// Register a behavior under its own node type
    pub fn register(&mut self, behavior: Arc<dyn NodeBehavior>) {
        self.behaviors
            .insert(behavior.node_type().to_string(), behavior);
    }

    /// Look up a behavior
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeBehavior>> {
        self.behaviors.get(node_type).cloned()
    }

    /// Look up a behavior or fail with UnknownNodeType
    pub fn require(&self, node_type: &str) -> Result<Arc<dyn NodeBehavior>> {
        self.get(node_type)
            .ok_or_else(|| FlowError::UnknownNodeType(node_type.to_string()))
    }

    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.behaviors.contains_key(node_type)
    }

    /// All registered node type tags
    pub fn node_types(&self) -> Vec<&str> {
        self.behaviors.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one; `other` wins on conflicts
    pub fn merge(&mut self, other: BehaviorRegistry) {
        self.behaviors.extend(other.behaviors);
    }

    /// Validate settings through the behavior for the given node type
    pub fn validate(&self, node_type: &str, settings: &serde_json::Value) -> Result<()> {
        let behavior = self.require(node_type)?;
        behavior
            .validate_settings(settings)
            .map_err(|e| FlowError::InvalidSettings {
                node_type: node_type.to_string(),
                message: e.to_string(),
            })
    }
}
