//! Event types for streaming run progress
//!
//! Events are sent from the scheduler to any consumer (editor frontend,
//! log collector) to report node and run state transitions.

use serde::{Deserialize, Serialize};

use crate::types::{GraphId, NodeId};

/// Trait for sending run events
///
/// Abstracts over the transport (channel, websocket bridge, test buffer)
/// so the engine can run in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g. channel
    /// closed); the scheduler ignores sink failures.
    fn send(&self, event: FlowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a graph run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { graph_id: GraphId, run_id: String },

    #[serde(rename_all = "camelCase")]
    NodeStarted { node_id: NodeId, run_id: String },

    /// Node was fresh and reused its cached result
    #[serde(rename_all = "camelCase")]
    NodeSkipped { node_id: NodeId, run_id: String },

    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node_id: NodeId,
        run_id: String,
        duration_ms: u64,
    },

    #[serde(rename_all = "camelCase")]
    NodeFailed {
        node_id: NodeId,
        run_id: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeCancelled { node_id: NodeId, run_id: String },

    #[serde(rename_all = "camelCase")]
    RunCompleted {
        graph_id: GraphId,
        run_id: String,
        executed: usize,
        skipped: usize,
    },

    #[serde(rename_all = "camelCase")]
    RunFailed {
        graph_id: GraphId,
        run_id: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    RunCancelled { graph_id: GraphId, run_id: String },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: FlowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<FlowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: FlowEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
