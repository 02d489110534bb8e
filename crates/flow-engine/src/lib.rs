//! Flow Engine - dependency-graph execution for flowmill pipelines
//!
//! This crate is the stateful core of a visual data-pipeline builder:
//! a directed acyclic graph of transformation steps over tabular data,
//! with content-hash staleness tracking, a skip/local/remote scheduler,
//! and compressed snapshot undo/redo.
//!
//! # Architecture
//!
//! - `FlowGraph`: authoritative structure; nodes, edges, topological
//!   order, and lazy staleness via recursive content fingerprints
//! - `Scheduler`: walks the graph in dependency order, reuses fresh
//!   caches, and routes materialization local or remote per node
//! - `HistoryManager`: compressed snapshot-based undo/redo
//! - `FlowRegistry`: explicit application context owning per-graph
//!   sessions, the behavior registry, and the shared local pool
//!
//! Dataframe semantics stay outside: behaviors build opaque plans, and a
//! `PlanEvaluator` (or a remote worker behind `RemoteDispatcher`) turns
//! plans into schemas, counts, samples, and materialized tables.
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{FlowRegistry, GraphSettings, EdgeRole};
//!
//! let registry = FlowRegistry::new(behaviors, evaluator);
//! let handle = registry.create_graph(1, GraphSettings::default()).await?;
//! let mut session = handle.lock().await;
//! session.add_node_promise(1, "read")?;
//! session.finalize_node(1, settings)?;
//! let result = session.run_graph().await?;
//! ```

pub mod behavior;
pub mod cancel;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod graph;
pub mod history;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use behavior::{BehaviorContext, BehaviorInput, BehaviorRegistry, NodeBehavior};
pub use cancel::CancelToken;
pub use error::{FlowError, Result};
pub use evaluator::{EvalOutcome, OperationType, PlanEvaluator, TableSummary};
pub use events::{EventSink, FlowEvent, NullEventSink, VecEventSink};
pub use graph::FlowGraph;
pub use history::{ActionType, HistoryManager, HistoryOutcome, HistoryState};
pub use node::{Node, NodePromise, NodeStage};
pub use registry::{EngineConfig, FlowRegistry, FlowSession, SessionHandle};
pub use scheduler::{
    DispatchOutcome, NodeReport, RemoteDispatcher, RunResult, RunState, Scheduler,
};
pub use types::{
    Edge, EdgeRole, ExecutionLocation, ExecutionMode, FieldSchema, GraphId, GraphSettings,
    GraphSpec, NodeId, NodeResult, NodeSpec, RunStats, TableSchema,
};
