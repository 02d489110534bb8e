//! Execution scheduler
//!
//! Walks a graph in dependency order and drives each node through its run
//! state machine: PENDING -> (SKIPPED | RUNNING) -> (DONE | FAILED |
//! CANCELLED). Fresh nodes are skipped with their cached result; stale
//! nodes execute their behavior to build a plan, then run an optional
//! materialization step either in-process (bounded pool) or through the
//! remote dispatcher.
//!
//! Per-node computation errors are captured in the run report and
//! propagate fail-fast to dependents; they never escape `run_graph`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::behavior::{BehaviorContext, BehaviorInput, BehaviorRegistry};
use crate::cancel::CancelToken;
use crate::error::{FlowError, Result};
use crate::evaluator::{EvalOutcome, OperationType, PlanEvaluator};
use crate::events::{EventSink, FlowEvent, NullEventSink};
use crate::graph::FlowGraph;
use crate::types::{EdgeRole, ExecutionLocation, ExecutionMode, NodeId, TableSchema};

/// Default size of the shared local evaluation pool
const DEFAULT_POOL_SIZE: usize = 4;

/// Per-node run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Skipped,
    Running,
    Done,
    Failed,
    Cancelled,
}

/// Outcome of one node within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub state: RunState,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Aggregated outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub success: bool,
    /// Nodes whose behavior was invoked
    pub executed: usize,
    /// Nodes served from cache
    pub skipped: usize,
    pub reports: Vec<NodeReport>,
}

impl RunResult {
    /// Report for one node, if it was part of the run
    pub fn report(&self, node_id: NodeId) -> Option<&NodeReport> {
        self.reports.iter().find(|r| r.node_id == node_id)
    }
}

/// What a remote dispatch produced
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub schema: Option<TableSchema>,
    /// Binary columnar payload, already integrity-checked by the client
    pub data: Option<Vec<u8>>,
    pub file_ref: Option<String>,
    pub row_count: Option<u64>,
}

impl From<EvalOutcome> for DispatchOutcome {
    fn from(outcome: EvalOutcome) -> Self {
        match outcome {
            EvalOutcome::Schema(schema) => Self {
                schema: Some(schema),
                ..Default::default()
            },
            EvalOutcome::Count(count) => Self {
                row_count: Some(count),
                ..Default::default()
            },
            EvalOutcome::Table(data) => Self {
                data: Some(data),
                ..Default::default()
            },
            EvalOutcome::Written(file_ref) => Self {
                file_ref: Some(file_ref),
                ..Default::default()
            },
        }
    }
}

/// Transport-agnostic handle onto the worker dispatch channel
///
/// The scheduler never sees task ids, stream frames, or poll loops; the
/// implementation owns transport selection and fallback.
#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    /// Submit a plan and wait for its terminal outcome
    ///
    /// Implementations must watch `cancel` and translate it into an
    /// out-of-band interrupt of the worker task.
    async fn dispatch(
        &self,
        op: OperationType,
        plan: &[u8],
        cache_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<DispatchOutcome>;
}

/// Walks graphs in dependency order and executes stale nodes
pub struct Scheduler {
    behaviors: Arc<BehaviorRegistry>,
    evaluator: Arc<dyn PlanEvaluator>,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    /// Bounded pool for local evaluation, shared across graphs
    pool: Arc<Semaphore>,
    events: Arc<dyn EventSink>,
    cache_dir: PathBuf,
}

impl Scheduler {
    pub fn new(behaviors: Arc<BehaviorRegistry>, evaluator: Arc<dyn PlanEvaluator>) -> Self {
        Self {
            behaviors,
            evaluator,
            dispatcher: None,
            pool: Arc::new(Semaphore::new(DEFAULT_POOL_SIZE)),
            events: Arc::new(NullEventSink),
            cache_dir: std::env::temp_dir(),
        }
    }

    /// Enable remote dispatch for heavy or explicitly remote nodes
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Share a bounded local evaluation pool
    pub fn with_pool(mut self, pool: Arc<Semaphore>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Run the whole graph in dependency order
    pub async fn run_graph(&self, graph: &mut FlowGraph, cancel: &CancelToken) -> Result<RunResult> {
        let order = graph.topological_order();
        self.run_order(graph, order, cancel).await
    }

    /// Run one node, recursively running un-computed ancestors first
    pub async fn run_node(
        &self,
        graph: &mut FlowGraph,
        node_id: NodeId,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        graph.require(node_id)?;
        let mut wanted = graph.ancestors_of(node_id);
        wanted.insert(node_id);
        let order: Vec<NodeId> = graph
            .topological_order()
            .into_iter()
            .filter(|id| wanted.contains(id))
            .collect();
        self.run_order(graph, order, cancel).await
    }

    async fn run_order(
        &self,
        graph: &mut FlowGraph,
        order: Vec<NodeId>,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.emit(FlowEvent::RunStarted {
            graph_id: graph.id,
            run_id: run_id.clone(),
        });

        // Staleness is decided against the pre-run state, in one pass
        let mut fp_memo = HashMap::new();
        let mut needs_memo = HashMap::new();
        let needs: HashMap<NodeId, bool> = order
            .iter()
            .map(|&id| (id, graph.needs_run_memo(id, &mut fp_memo, &mut needs_memo)))
            .collect();
        let fingerprints: HashMap<NodeId, u64> = order
            .iter()
            .map(|&id| (id, graph.fingerprint_memo(id, &mut fp_memo)))
            .collect();

        let mut states: HashMap<NodeId, RunState> = HashMap::new();
        let mut reports = Vec::with_capacity(order.len());
        let mut executed = 0usize;
        let mut skipped = 0usize;
        let mut first_error: Option<String> = None;

        for &id in &order {
            let started = Instant::now();

            // Still-pending nodes move straight to CANCELLED
            if cancel.is_cancelled() {
                states.insert(id, RunState::Cancelled);
                self.emit(FlowEvent::NodeCancelled {
                    node_id: id,
                    run_id: run_id.clone(),
                });
                reports.push(NodeReport {
                    node_id: id,
                    state: RunState::Cancelled,
                    error: None,
                    duration_ms: 0,
                });
                continue;
            }

            // Fail-fast: a failed input poisons every dependent
            let upstream_failure = graph
                .upstream_ids(id)
                .iter()
                .any(|up| states.get(up) == Some(&RunState::Failed));
            if upstream_failure {
                let message = "upstream node failed".to_string();
                graph.require_mut(id)?.record_error(&message);
                states.insert(id, RunState::Failed);
                first_error.get_or_insert(message.clone());
                self.emit(FlowEvent::NodeFailed {
                    node_id: id,
                    run_id: run_id.clone(),
                    error: message.clone(),
                });
                reports.push(NodeReport {
                    node_id: id,
                    state: RunState::Failed,
                    error: Some(message),
                    duration_ms: 0,
                });
                continue;
            }

            let active = graph.require(id)?.stats.active;
            if !active || !needs[&id] {
                states.insert(id, RunState::Skipped);
                skipped += 1;
                self.emit(FlowEvent::NodeSkipped {
                    node_id: id,
                    run_id: run_id.clone(),
                });
                reports.push(NodeReport {
                    node_id: id,
                    state: RunState::Skipped,
                    error: None,
                    duration_ms: 0,
                });
                continue;
            }

            states.insert(id, RunState::Running);
            self.emit(FlowEvent::NodeStarted {
                node_id: id,
                run_id: run_id.clone(),
            });

            match self.execute_node(graph, id, fingerprints[&id], cancel).await {
                Ok(()) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    states.insert(id, RunState::Done);
                    executed += 1;
                    self.emit(FlowEvent::NodeCompleted {
                        node_id: id,
                        run_id: run_id.clone(),
                        duration_ms,
                    });
                    reports.push(NodeReport {
                        node_id: id,
                        state: RunState::Done,
                        error: None,
                        duration_ms,
                    });
                }
                Err(FlowError::Cancelled) => {
                    states.insert(id, RunState::Cancelled);
                    self.emit(FlowEvent::NodeCancelled {
                        node_id: id,
                        run_id: run_id.clone(),
                    });
                    reports.push(NodeReport {
                        node_id: id,
                        state: RunState::Cancelled,
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    graph.require_mut(id)?.record_error(&message);
                    states.insert(id, RunState::Failed);
                    first_error.get_or_insert(message.clone());
                    log::warn!("node {} failed: {}", id, message);
                    self.emit(FlowEvent::NodeFailed {
                        node_id: id,
                        run_id: run_id.clone(),
                        error: message.clone(),
                    });
                    reports.push(NodeReport {
                        node_id: id,
                        state: RunState::Failed,
                        error: Some(message),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        let success = first_error.is_none() && !cancelled;
        if cancelled {
            self.emit(FlowEvent::RunCancelled {
                graph_id: graph.id,
                run_id: run_id.clone(),
            });
        } else if let Some(error) = &first_error {
            self.emit(FlowEvent::RunFailed {
                graph_id: graph.id,
                run_id: run_id.clone(),
                error: error.clone(),
            });
        } else {
            self.emit(FlowEvent::RunCompleted {
                graph_id: graph.id,
                run_id: run_id.clone(),
                executed,
                skipped,
            });
        }

        Ok(RunResult {
            run_id,
            success,
            executed,
            skipped,
            reports,
        })
    }

    /// Execute one stale node: behavior, then materialization
    async fn execute_node(
        &self,
        graph: &mut FlowGraph,
        id: NodeId,
        fingerprint: u64,
        cancel: &CancelToken,
    ) -> Result<()> {
        let (node_type, settings, edges, location) = {
            let node = graph.require(id)?;
            (
                node.node_type.clone(),
                node.require_settings()?.clone(),
                node.inputs.clone(),
                node.location,
            )
        };
        let behavior = self.behaviors.require(&node_type)?;

        let resolved: Vec<(EdgeRole, NodeId, crate::types::NodeResult)> = edges
            .iter()
            .map(|e| -> Result<_> {
                Ok((e.role, e.from, graph.get_resulting_data(e.from)?.clone()))
            })
            .collect::<Result<_>>()?;
        let inputs: Vec<BehaviorInput<'_>> = resolved
            .iter()
            .map(|(role, node_id, result)| BehaviorInput {
                role: *role,
                node_id: *node_id,
                result,
            })
            .collect();

        let mut result = behavior
            .execute(BehaviorContext {
                node_id: id,
                settings: &settings,
                inputs: &inputs,
                cancel,
            })
            .await?;

        // Cancellation is checked between coarse units of work
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let heavy = behavior.heavy_operation();
        let op = heavy.or(match graph.settings.execution_mode {
            ExecutionMode::Interactive => Some(OperationType::StoreSample),
            ExecutionMode::Batch => None,
        });

        if let Some(op) = op {
            let remote = match location {
                ExecutionLocation::Remote => true,
                ExecutionLocation::Local => false,
                ExecutionLocation::Auto => heavy.is_some() && self.dispatcher.is_some(),
            };

            let outcome = if remote {
                let dispatcher = self
                    .dispatcher
                    .as_ref()
                    .ok_or_else(|| FlowError::transport("no remote dispatcher configured"))?;
                log::debug!("node {}: dispatching '{}' to worker", id, op);
                dispatcher
                    .dispatch(op, &result.plan, &self.cache_dir, cancel)
                    .await?
            } else {
                self.evaluate_local(op, &result.plan, cancel).await?
            };

            if let Some(schema) = outcome.schema {
                result.schema = schema;
            }
            if let Some(count) = outcome.row_count {
                result.row_count = Some(count);
            }
            if let Some(data) = outcome.data {
                result.sample = Some(data);
            }
            if let Some(file_ref) = outcome.file_ref {
                result.file_ref = Some(file_ref);
            }
        }

        // A cancelled run never adopts a partial result as cached
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        graph.require_mut(id)?.store_result(fingerprint, result);
        Ok(())
    }

    /// Evaluate in-process under a pool permit, abandoning the result on
    /// cancellation
    async fn evaluate_local(
        &self,
        op: OperationType,
        plan: &[u8],
        cancel: &CancelToken,
    ) -> Result<DispatchOutcome> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| FlowError::computation("local evaluation pool is closed"))?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            result = self.evaluator.evaluate(op, plan, &self.cache_dir) => result?,
        };
        Ok(outcome.into())
    }

    fn emit(&self, event: FlowEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use crate::node::NodePromise;
    use crate::testing::{
        scenario_rows, test_registry, CancelOnceBehavior, Counters, MockEvaluator,
        RecordingDispatcher,
    };
    use crate::types::GraphSettings;
    use std::sync::atomic::Ordering;

    fn scenario_graph() -> FlowGraph {
        let mut graph = FlowGraph::new(1);
        graph.add_node(NodePromise::new(1, "read")).unwrap();
        graph
            .finalize_node(1, serde_json::json!({"rows": scenario_rows()}))
            .unwrap();
        graph.add_node(NodePromise::new(2, "filter")).unwrap();
        graph
            .finalize_node(2, serde_json::json!({"column": "quantity", "gt": 10}))
            .unwrap();
        graph.add_node(NodePromise::new(3, "aggregate")).unwrap();
        graph
            .finalize_node(3, serde_json::json!({"key": "region", "value": "quantity"}))
            .unwrap();
        graph.connect(1, 2, EdgeRole::Main).unwrap();
        graph.connect(2, 3, EdgeRole::Main).unwrap();
        graph
    }

    fn scheduler(counters: &Counters) -> Scheduler {
        Scheduler::new(
            Arc::new(test_registry(counters)),
            Arc::new(MockEvaluator::new(counters)),
        )
    }

    fn sample_rows(graph: &FlowGraph, id: NodeId) -> Vec<serde_json::Value> {
        let data = graph.get_resulting_data(id).unwrap();
        serde_json::from_slice(data.sample.as_deref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_scenario_filter_aggregate() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);
        let mut graph = scenario_graph();

        let result = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.executed, 3);
        assert_eq!(result.skipped, 0);

        // Filter keeps rows with quantity > 10 out of 3 source rows
        let filtered = sample_rows(&graph, 2);
        assert!(filtered.len() <= 3);
        assert!(filtered
            .iter()
            .all(|r| r["quantity"].as_f64().unwrap() > 10.0));

        // Aggregate yields one row per region present in the filter output
        let regions: std::collections::HashSet<&str> = filtered
            .iter()
            .map(|r| r["region"].as_str().unwrap())
            .collect();
        let aggregated = sample_rows(&graph, 3);
        assert_eq!(aggregated.len(), regions.len());
    }

    #[tokio::test]
    async fn test_second_run_all_skipped_without_invoking_behaviors() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);
        let mut graph = scenario_graph();

        scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        let first_sample = sample_rows(&graph, 3);
        let calls_after_first = counters.behavior_calls.load(Ordering::SeqCst);

        let second = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(second.executed, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(
            counters.behavior_calls.load(Ordering::SeqCst),
            calls_after_first
        );
        assert_eq!(sample_rows(&graph, 3), first_sample);
    }

    #[tokio::test]
    async fn test_settings_change_reruns_downstream_only() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);
        let mut graph = scenario_graph();

        scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();

        graph
            .set_settings(2, serde_json::json!({"column": "quantity", "gt": 20}))
            .unwrap();
        assert!(!graph.needs_run(1));
        assert!(graph.needs_run(2));
        assert!(graph.needs_run(3));

        let result = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.executed, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.report(1).unwrap().state, RunState::Skipped);
    }

    #[tokio::test]
    async fn test_fail_fast_propagation() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);

        let mut graph = FlowGraph::new(1);
        graph.add_node(NodePromise::new(1, "read")).unwrap();
        graph
            .finalize_node(1, serde_json::json!({"rows": scenario_rows()}))
            .unwrap();
        graph.add_node(NodePromise::new(2, "boom")).unwrap();
        graph.finalize_node(2, serde_json::json!({})).unwrap();
        graph.add_node(NodePromise::new(3, "aggregate")).unwrap();
        graph
            .finalize_node(3, serde_json::json!({"key": "region", "value": "quantity"}))
            .unwrap();
        graph.connect(1, 2, EdgeRole::Main).unwrap();
        graph.connect(2, 3, EdgeRole::Main).unwrap();

        let aggregate_calls_before = counters.aggregate_calls.load(Ordering::SeqCst);
        let result = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.report(1).unwrap().state, RunState::Done);
        assert_eq!(result.report(2).unwrap().state, RunState::Failed);
        assert_eq!(result.report(3).unwrap().state, RunState::Failed);
        // The dependent's behavior was never invoked
        assert_eq!(
            counters.aggregate_calls.load(Ordering::SeqCst),
            aggregate_calls_before
        );
        // And the error is recorded on the node
        assert!(graph.node(2).unwrap().stats.error.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_mid_run() {
        let counters = Counters::default();
        let mut registry = test_registry(&counters);
        registry.register(Arc::new(CancelOnceBehavior::new()));
        let scheduler = Scheduler::new(
            Arc::new(registry),
            Arc::new(MockEvaluator::new(&counters)),
        );

        let mut graph = FlowGraph::new(1);
        graph.add_node(NodePromise::new(1, "read")).unwrap();
        graph
            .finalize_node(1, serde_json::json!({"rows": scenario_rows()}))
            .unwrap();
        graph.add_node(NodePromise::new(2, "cancel_once")).unwrap();
        graph.finalize_node(2, serde_json::json!({})).unwrap();
        graph.add_node(NodePromise::new(3, "aggregate")).unwrap();
        graph
            .finalize_node(3, serde_json::json!({"key": "region", "value": "quantity"}))
            .unwrap();
        graph.connect(1, 2, EdgeRole::Main).unwrap();
        graph.connect(2, 3, EdgeRole::Main).unwrap();

        // First run: node 2 cancels the run while RUNNING
        let first = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert!(!first.success);
        assert_eq!(first.report(1).unwrap().state, RunState::Done);
        assert_eq!(first.report(2).unwrap().state, RunState::Cancelled);
        assert_eq!(first.report(3).unwrap().state, RunState::Cancelled);

        // Upstream cache is intact; cancellation never marks a node as run
        assert!(graph.get_resulting_data(1).is_ok());
        assert!(!graph.needs_run(1));
        assert!(graph.needs_run(2));
        assert!(graph.needs_run(3));

        // A subsequent run re-executes nodes 2 and 3
        let second = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert!(second.success);
        assert_eq!(second.executed, 2);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_starts_nothing() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);
        let mut graph = scenario_graph();

        let token = CancelToken::new();
        token.cancel();
        let result = scheduler.run_graph(&mut graph, &token).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.executed, 0);
        assert!(result
            .reports
            .iter()
            .all(|r| r.state == RunState::Cancelled));
        assert_eq!(counters.behavior_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_heavy_node_routes_through_dispatcher_on_auto() {
        let counters = Counters::default();
        let dispatcher = Arc::new(RecordingDispatcher::new(&counters));
        let scheduler = Scheduler::new(
            Arc::new(test_registry(&counters)),
            Arc::new(MockEvaluator::new(&counters)),
        )
        .with_dispatcher(dispatcher.clone());

        let mut graph = FlowGraph::new(1);
        graph.settings = GraphSettings {
            execution_mode: crate::types::ExecutionMode::Batch,
        };
        graph.add_node(NodePromise::new(1, "read")).unwrap();
        graph
            .finalize_node(1, serde_json::json!({"rows": scenario_rows()}))
            .unwrap();
        graph.add_node(NodePromise::new(2, "write")).unwrap();
        graph
            .finalize_node(2, serde_json::json!({"path": "out.json"}))
            .unwrap();
        graph.connect(1, 2, EdgeRole::Main).unwrap();

        let result = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.success);

        // Only the heavy write node went remote
        assert_eq!(
            dispatcher.dispatched(),
            vec![OperationType::WriteOutput]
        );
        assert!(graph
            .get_resulting_data(2)
            .unwrap()
            .file_ref
            .is_some());
    }

    #[tokio::test]
    async fn test_explicit_local_overrides_heavy_flag() {
        let counters = Counters::default();
        let dispatcher = Arc::new(RecordingDispatcher::new(&counters));
        let scheduler = Scheduler::new(
            Arc::new(test_registry(&counters)),
            Arc::new(MockEvaluator::new(&counters)),
        )
        .with_dispatcher(dispatcher.clone());

        let mut graph = FlowGraph::new(1);
        graph.add_node(NodePromise::new(1, "read")).unwrap();
        graph
            .finalize_node(1, serde_json::json!({"rows": scenario_rows()}))
            .unwrap();
        graph.add_node(NodePromise::new(2, "write")).unwrap();
        graph
            .finalize_node(2, serde_json::json!({"path": "out.json"}))
            .unwrap();
        graph.require_mut(2).unwrap().location = ExecutionLocation::Local;
        graph.connect(1, 2, EdgeRole::Main).unwrap();

        scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert!(dispatcher.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_run_node_triggers_uncomputed_ancestors() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);
        let mut graph = scenario_graph();

        let result = scheduler
            .run_node(&mut graph, 3, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.executed, 3);

        // Editing only the leaf re-runs only the leaf
        graph
            .set_settings(3, serde_json::json!({"key": "region", "value": "quantity", "min_rows": 1}))
            .unwrap();
        let second = scheduler
            .run_node(&mut graph, 3, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(second.executed, 1);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_draft_node_fails_at_execution() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);

        let mut graph = FlowGraph::new(1);
        graph.add_node(NodePromise::new(1, "read")).unwrap();

        let result = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        let report = result.report(1).unwrap();
        assert_eq!(report.state, RunState::Failed);
        assert!(report.error.as_deref().unwrap().contains("finalized"));
    }

    #[tokio::test]
    async fn test_inactive_node_is_skipped() {
        let counters = Counters::default();
        let scheduler = scheduler(&counters);
        let mut graph = scenario_graph();
        graph.require_mut(3).unwrap().stats.active = false;

        let result = scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.report(3).unwrap().state, RunState::Skipped);
        assert_eq!(result.executed, 2);
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let counters = Counters::default();
        let sink = Arc::new(VecEventSink::new());
        let scheduler = Scheduler::new(
            Arc::new(test_registry(&counters)),
            Arc::new(MockEvaluator::new(&counters)),
        )
        .with_events(sink.clone());

        let mut graph = scenario_graph();
        scheduler
            .run_graph(&mut graph, &CancelToken::new())
            .await
            .unwrap();

        let events = sink.events();
        assert!(matches!(events.first(), Some(FlowEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(FlowEvent::RunCompleted {
                executed: 3,
                skipped: 0,
                ..
            })
        ));
    }
}
