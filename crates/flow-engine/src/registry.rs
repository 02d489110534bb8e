//! Application context: graph sessions keyed by graph id
//!
//! `FlowRegistry` is the explicit top-level owner of everything that
//! would otherwise be a process-wide singleton: the behavior registry,
//! the evaluator, the shared local pool, and the per-graph sessions.
//!
//! Each graph lives in a `FlowSession` behind its own async mutex, so
//! graphs run concurrently while one graph's run holds that graph
//! exclusively. `cancel` bypasses the session lock so an in-flight run
//! can be interrupted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::behavior::BehaviorRegistry;
use crate::cancel::CancelToken;
use crate::error::{FlowError, Result};
use crate::evaluator::PlanEvaluator;
use crate::graph::FlowGraph;
use crate::history::{ActionType, HistoryManager, HistoryOutcome, HistoryState, Snapshot};
use crate::node::{Node, NodePromise};
use crate::scheduler::{RemoteDispatcher, RunResult, Scheduler};
use crate::types::{EdgeRole, GraphId, GraphSettings, NodeId, NodeResult};

/// Engine-wide tunables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Undo stack depth cap
    pub history_depth: usize,
    /// Compressed-byte budget across undo/redo snapshots
    pub history_byte_budget: usize,
    /// Size of the local evaluation pool shared across graphs
    pub local_pool_size: usize,
    /// Directory for materialized caches
    pub cache_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_depth: 50,
            history_byte_budget: 16 * 1024 * 1024,
            local_pool_size: 4,
            cache_dir: std::env::temp_dir().join("flowmill"),
        }
    }
}

/// Cloneable handle onto one graph session
///
/// `lock` gives exclusive access for mutation and runs; `cancel` reaches
/// the in-flight run's token without taking the session lock.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<FlowSession>>,
    cancel_slot: Arc<std::sync::Mutex<CancelToken>>,
}

impl SessionHandle {
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, FlowSession> {
        self.session.lock().await
    }

    /// Cancel the current run, if one is in flight
    pub fn cancel(&self) {
        self.cancel_slot.lock().unwrap().cancel();
    }
}

/// Owner of all graph sessions
pub struct FlowRegistry {
    behaviors: Arc<BehaviorRegistry>,
    evaluator: Arc<dyn PlanEvaluator>,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    events: Arc<dyn crate::events::EventSink>,
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    sessions: RwLock<HashMap<GraphId, SessionHandle>>,
}

impl FlowRegistry {
    pub fn new(behaviors: Arc<BehaviorRegistry>, evaluator: Arc<dyn PlanEvaluator>) -> Self {
        let config = EngineConfig::default();
        let events: Arc<dyn crate::events::EventSink> = Arc::new(crate::events::NullEventSink);
        let scheduler = Self::build_scheduler(&behaviors, &evaluator, &None, &events, &config);
        Self {
            behaviors,
            evaluator,
            dispatcher: None,
            events,
            config,
            scheduler,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self.rebuild_scheduler();
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self.rebuild_scheduler();
        self
    }

    pub fn with_events(mut self, events: Arc<dyn crate::events::EventSink>) -> Self {
        self.events = events;
        self.rebuild_scheduler();
        self
    }

    fn build_scheduler(
        behaviors: &Arc<BehaviorRegistry>,
        evaluator: &Arc<dyn PlanEvaluator>,
        dispatcher: &Option<Arc<dyn RemoteDispatcher>>,
        events: &Arc<dyn crate::events::EventSink>,
        config: &EngineConfig,
    ) -> Arc<Scheduler> {
        let mut scheduler = Scheduler::new(behaviors.clone(), evaluator.clone())
            .with_pool(Arc::new(Semaphore::new(config.local_pool_size)))
            .with_events(events.clone())
            .with_cache_dir(config.cache_dir.clone());
        if let Some(dispatcher) = dispatcher {
            scheduler = scheduler.with_dispatcher(dispatcher.clone());
        }
        Arc::new(scheduler)
    }

    fn rebuild_scheduler(&mut self) {
        self.scheduler = Self::build_scheduler(
            &self.behaviors,
            &self.evaluator,
            &self.dispatcher,
            &self.events,
            &self.config,
        );
    }

    /// Create and register a new empty graph
    pub async fn create_graph(
        &self,
        id: GraphId,
        settings: GraphSettings,
    ) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(FlowError::DuplicateGraph(id));
        }
        let session = FlowSession::new(
            FlowGraph::with_settings(id, settings),
            self.behaviors.clone(),
            self.scheduler.clone(),
            &self.config,
        );
        let handle = SessionHandle {
            cancel_slot: session.cancel_slot.clone(),
            session: Arc::new(Mutex::new(session)),
        };
        sessions.insert(id, handle.clone());
        log::info!("registered graph {}", id);
        Ok(handle)
    }

    /// Handle for an existing graph
    pub async fn session(&self, id: GraphId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Drop a graph and its session
    pub async fn remove_graph(&self, id: GraphId) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Ids of all registered graphs, ascending
    pub async fn graph_ids(&self) -> Vec<GraphId> {
        let mut ids: Vec<GraphId> = self.sessions.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// One graph plus its history and run machinery
///
/// Exposes the node lifecycle API; every tracked mutation captures a
/// pre-mutation snapshot, and a rejected mutation leaves history
/// untouched.
pub struct FlowSession {
    graph: FlowGraph,
    history: HistoryManager,
    behaviors: Arc<BehaviorRegistry>,
    scheduler: Arc<Scheduler>,
    cancel_slot: Arc<std::sync::Mutex<CancelToken>>,
}

impl FlowSession {
    fn new(
        graph: FlowGraph,
        behaviors: Arc<BehaviorRegistry>,
        scheduler: Arc<Scheduler>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            graph,
            history: HistoryManager::new(config.history_depth, config.history_byte_budget),
            behaviors,
            scheduler,
            cancel_slot: Arc::new(std::sync::Mutex::new(CancelToken::new())),
        }
    }

    /// Capture-then-mutate: the snapshot only enters history when the
    /// mutation succeeds
    fn tracked<T>(
        &mut self,
        action: ActionType,
        description: String,
        node_id: Option<NodeId>,
        mutate: impl FnOnce(&mut FlowGraph) -> Result<T>,
    ) -> Result<T> {
        let snapshot = Snapshot::capture(&self.graph, action, description, node_id)?;
        let value = mutate(&mut self.graph)?;
        self.history.push(snapshot);
        Ok(value)
    }

    // ── Node lifecycle API ──────────────────────────────────────────

    /// Register a node promise (id and type only)
    pub fn add_node_promise(&mut self, id: NodeId, node_type: &str) -> Result<()> {
        self.tracked(
            ActionType::AddNode,
            format!("Add {} node {}", node_type, id),
            Some(id),
            |graph| graph.add_node(NodePromise::new(id, node_type)),
        )
    }

    /// Configure a promised node with validated settings
    pub fn finalize_node(&mut self, id: NodeId, settings: serde_json::Value) -> Result<()> {
        let node_type = self.graph.require(id)?.node_type.clone();
        self.behaviors.validate(&node_type, &settings)?;
        self.tracked(
            ActionType::FinalizeNode,
            format!("Configure node {}", id),
            Some(id),
            |graph| graph.finalize_node(id, settings),
        )
    }

    /// Replace a configured node's settings
    pub fn set_node_settings(&mut self, id: NodeId, settings: serde_json::Value) -> Result<()> {
        let node_type = self.graph.require(id)?.node_type.clone();
        self.behaviors.validate(&node_type, &settings)?;
        self.tracked(
            ActionType::UpdateSettings,
            format!("Change settings of node {}", id),
            Some(id),
            |graph| graph.set_settings(id, settings),
        )
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId, role: EdgeRole) -> Result<()> {
        self.tracked(
            ActionType::Connect,
            format!("Connect {} -> {} ({})", from, to, role),
            Some(to),
            |graph| graph.connect(from, to, role),
        )
    }

    pub fn disconnect(&mut self, from: NodeId, to: NodeId, role: EdgeRole) -> Result<()> {
        self.tracked(
            ActionType::Disconnect,
            format!("Disconnect {} -> {} ({})", from, to, role),
            Some(to),
            |graph| graph.disconnect(from, to, role),
        )
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.tracked(
            ActionType::RemoveNode,
            format!("Remove node {}", id),
            Some(id),
            |graph| graph.remove_node(id),
        )
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run the whole graph
    pub async fn run_graph(&mut self) -> Result<RunResult> {
        let token = self.fresh_token();
        self.scheduler.run_graph(&mut self.graph, &token).await
    }

    /// Run one node after its un-computed ancestors
    pub async fn run_node(&mut self, id: NodeId) -> Result<RunResult> {
        let token = self.fresh_token();
        self.scheduler.run_node(&mut self.graph, id, &token).await
    }

    fn fresh_token(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.cancel_slot.lock().unwrap() = token.clone();
        token
    }

    /// Cancel the current run
    pub fn cancel(&self) {
        self.cancel_slot.lock().unwrap().cancel();
    }

    // ── History ─────────────────────────────────────────────────────

    pub fn undo(&mut self) -> Result<HistoryOutcome> {
        self.history.undo(&mut self.graph)
    }

    pub fn redo(&mut self) -> Result<HistoryOutcome> {
        self.history.redo(&mut self.graph)
    }

    pub fn history_state(&self) -> HistoryState {
        self.history.history_state()
    }

    // ── Queries & persistence ───────────────────────────────────────

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node(id)
    }

    pub fn get_resulting_data(&self, id: NodeId) -> Result<&NodeResult> {
        self.graph.get_resulting_data(id)
    }

    pub fn needs_run(&self, id: NodeId) -> bool {
        self.graph.needs_run(id)
    }

    pub fn print_tree(&self) -> String {
        self.graph.print_tree()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.graph.save(path)
    }

    /// Replace the graph from a save file; history starts over
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.graph = FlowGraph::load(path)?;
        self.history.clear();
        Ok(())
    }
}
