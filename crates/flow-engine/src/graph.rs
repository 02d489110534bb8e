//! The dependency graph: authoritative structure of a pipeline
//!
//! The graph owns the node set; the edge set is derived from each node's
//! ordered input list, which keeps a single source of truth. Edges are
//! acyclic by construction: `connect` rejects any edge that would close a
//! cycle and leaves the graph untouched.
//!
//! Staleness is evaluated lazily on query. Each node has a content
//! fingerprint (hash of its own settings and the fingerprints of its
//! direct inputs, recursively); "needs run" means the cached fingerprint
//! is missing or stale, or an ancestor needs a run.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::error::{FlowError, Result};
use crate::node::{Node, NodePromise};
use crate::types::{Edge, EdgeRole, GraphId, GraphSettings, GraphSpec, NodeId, NodeResult};

/// A directed acyclic graph of pipeline nodes
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub id: GraphId,
    pub settings: GraphSettings,
    nodes: BTreeMap<NodeId, Node>,
}

impl FlowGraph {
    /// Create a new empty graph
    pub fn new(id: GraphId) -> Self {
        Self {
            id,
            settings: GraphSettings::default(),
            nodes: BTreeMap::new(),
        }
    }

    /// Create a new empty graph with explicit settings
    pub fn with_settings(id: GraphId, settings: GraphSettings) -> Self {
        Self {
            id,
            settings,
            nodes: BTreeMap::new(),
        }
    }

    // ── Structure ───────────────────────────────────────────────────

    /// Register a node promise (phase one of construction)
    pub fn add_node(&mut self, promise: NodePromise) -> Result<()> {
        if self.nodes.contains_key(&promise.id) {
            return Err(FlowError::DuplicateNode(promise.id));
        }
        self.nodes.insert(promise.id, Node::from_promise(promise));
        Ok(())
    }

    /// Configure a registered node with settings (phase two)
    pub fn finalize_node(&mut self, id: NodeId, settings: serde_json::Value) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(FlowError::UnknownNode(id))?;
        node.finalize(settings);
        Ok(())
    }

    /// Replace the settings of a configured node
    pub fn set_settings(&mut self, id: NodeId, settings: serde_json::Value) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(FlowError::UnknownNode(id))?;
        if node.is_draft() {
            return Err(FlowError::NodeNotFinalized(id));
        }
        node.finalize(settings);
        Ok(())
    }

    /// Connect `from` into `to` under the given input role
    ///
    /// Rejected (graph unchanged) when an endpoint is missing, the edge
    /// would close a cycle, or a singleton role is already occupied.
    pub fn connect(&mut self, from: NodeId, to: NodeId, role: EdgeRole) -> Result<()> {
        if !self.nodes.contains_key(&from) {
            return Err(FlowError::UnknownNode(from));
        }
        let target = self.nodes.get(&to).ok_or(FlowError::UnknownNode(to))?;
        if target.role_occupied(&role) {
            return Err(FlowError::RoleOccupied { node_id: to, role });
        }
        if from == to || self.reaches(to, from) {
            return Err(FlowError::CycleDetected { from, to });
        }
        if let Some(target) = self.nodes.get_mut(&to) {
            target.inputs.push(Edge { from, to, role });
        }
        Ok(())
    }

    /// Remove one edge by endpoints and role
    pub fn disconnect(&mut self, from: NodeId, to: NodeId, role: EdgeRole) -> Result<()> {
        if !self.nodes.contains_key(&from) {
            return Err(FlowError::UnknownNode(from));
        }
        let target = self.nodes.get_mut(&to).ok_or(FlowError::UnknownNode(to))?;
        let before = target.inputs.len();
        target
            .inputs
            .retain(|e| !(e.from == from && e.role == role));
        if target.inputs.len() == before {
            return Err(FlowError::UnknownEdge { from, to, role });
        }
        Ok(())
    }

    /// Remove a node and detach every edge touching it
    ///
    /// Downstream consumers stay in the graph with the dangling input
    /// removed; they remain until reconnected or removed themselves.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if self.nodes.remove(&id).is_none() {
            return Err(FlowError::UnknownNode(id));
        }
        for node in self.nodes.values_mut() {
            node.inputs.retain(|e| e.from != id);
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Look up a node
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Look up a node or fail with UnknownNode
    pub fn require(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(FlowError::UnknownNode(id))
    }

    pub(crate) fn require_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FlowError::UnknownNode(id))
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in ascending order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// All edges, ordered by target node then input position
    pub fn edges(&self) -> Vec<Edge> {
        self.nodes
            .values()
            .flat_map(|n| n.inputs.iter().copied())
            .collect()
    }

    /// Direct upstream node ids of `id`, in input order
    pub fn upstream_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|n| n.inputs.iter().map(|e| e.from).collect())
            .unwrap_or_default()
    }

    /// Direct downstream node ids of `id`, ascending
    pub fn downstream_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.inputs.iter().any(|e| e.from == id))
            .map(|n| n.id)
            .collect()
    }

    /// Nodes with no inputs, ascending
    pub fn start_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.inputs.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// Nodes with no outgoing edges, ascending
    pub fn leaf_nodes(&self) -> Vec<NodeId> {
        let sources: HashSet<NodeId> = self
            .nodes
            .values()
            .flat_map(|n| n.inputs.iter().map(|e| e.from))
            .collect();
        self.nodes
            .keys()
            .copied()
            .filter(|id| !sources.contains(id))
            .collect()
    }

    /// Whether a path exists from `from` to `to` along edges
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut queue = VecDeque::from([from]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for next in self.downstream_ids(current) {
                queue.push_back(next);
            }
        }
        false
    }

    /// All transitive ancestors of `id` (not including `id` itself)
    pub fn ancestors_of(&self, id: NodeId) -> HashSet<NodeId> {
        let mut queue: VecDeque<NodeId> = self.upstream_ids(id).into();
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for next in self.upstream_ids(current) {
                queue.push_back(next);
            }
        }
        seen
    }

    /// Deterministic execution order: Kahn's algorithm with ties broken
    /// by ascending node id
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .values()
            .map(|n| (n.id, n.inputs.len()))
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for next in self.downstream_ids(id) {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }
        order
    }

    /// Cached result of a node, or NotComputed
    pub fn get_resulting_data(&self, id: NodeId) -> Result<&NodeResult> {
        let node = self.require(id)?;
        node.result
            .as_ref()
            .map(|c| &c.data)
            .ok_or(FlowError::NotComputed(id))
    }

    // ── Staleness ───────────────────────────────────────────────────

    /// Content fingerprint of a node, memoized across one query
    pub(crate) fn fingerprint_memo(&self, id: NodeId, memo: &mut HashMap<NodeId, u64>) -> u64 {
        if let Some(fp) = memo.get(&id) {
            return *fp;
        }
        let fp = match self.nodes.get(&id) {
            Some(node) => {
                let inputs: Vec<(EdgeRole, u64)> = node
                    .inputs
                    .iter()
                    .map(|e| (e.role, self.fingerprint_memo(e.from, memo)))
                    .collect();
                node.fingerprint_with(&inputs)
            }
            // A dangling reference contributes a fixed marker
            None => 0,
        };
        memo.insert(id, fp);
        fp
    }

    /// Content fingerprint of a node
    pub fn fingerprint(&self, id: NodeId) -> u64 {
        self.fingerprint_memo(id, &mut HashMap::new())
    }

    pub(crate) fn needs_run_memo(
        &self,
        id: NodeId,
        fp_memo: &mut HashMap<NodeId, u64>,
        memo: &mut HashMap<NodeId, bool>,
    ) -> bool {
        if let Some(needs) = memo.get(&id) {
            return *needs;
        }
        let needs = match self.nodes.get(&id) {
            Some(node) => {
                let stale = match &node.result {
                    Some(cached) => cached.fingerprint != self.fingerprint_memo(id, fp_memo),
                    None => true,
                };
                stale
                    || node
                        .inputs
                        .iter()
                        .any(|e| self.needs_run_memo(e.from, fp_memo, memo))
            }
            None => true,
        };
        memo.insert(id, needs);
        needs
    }

    /// Whether the node must be recomputed: never run, fingerprint
    /// mismatch, or any ancestor needs a run
    pub fn needs_run(&self, id: NodeId) -> bool {
        self.needs_run_memo(id, &mut HashMap::new(), &mut HashMap::new())
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Declarative form: settings, edges, and graph settings only
    pub fn to_spec(&self) -> GraphSpec {
        GraphSpec {
            id: self.id,
            settings: self.settings,
            nodes: self.nodes.values().map(|n| n.to_spec()).collect(),
            edges: self.edges(),
        }
    }

    /// Rebuild a graph from its declarative form
    pub fn from_spec(spec: GraphSpec) -> Self {
        let mut graph = Self::with_settings(spec.id, spec.settings);
        for node_spec in spec.nodes {
            graph
                .nodes
                .insert(node_spec.id, Node::from_spec(node_spec));
        }
        for edge in spec.edges {
            if let Some(target) = graph.nodes.get_mut(&edge.to) {
                target.inputs.push(edge);
            }
        }
        graph
    }

    /// Replace this graph's declarative state in place
    ///
    /// Cached results are dropped; staleness re-derives from fingerprints
    /// on the next query.
    pub fn apply_spec(&mut self, spec: GraphSpec) {
        *self = Self::from_spec(spec);
    }

    /// Save the declarative form as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.to_spec())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a graph from a JSON save file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let spec: GraphSpec = serde_json::from_slice(&bytes)?;
        Ok(Self::from_spec(spec))
    }

    // ── Debug ───────────────────────────────────────────────────────

    /// Render execution stages for debugging
    pub fn print_tree(&self) -> String {
        let order = self.topological_order();
        let mut depth: HashMap<NodeId, usize> = HashMap::new();
        for &id in &order {
            let d = self
                .upstream_ids(id)
                .iter()
                .filter_map(|up| depth.get(up))
                .max()
                .map(|d| d + 1)
                .unwrap_or(0);
            depth.insert(id, d);
        }
        let stages = depth.values().max().map(|d| d + 1).unwrap_or(0);

        let mut out = format!("graph {} ({} nodes)\n", self.id, self.nodes.len());
        for stage in 0..stages {
            out.push_str(&format!("stage {}:\n", stage));
            for &id in order.iter().filter(|id| depth.get(*id) == Some(&stage)) {
                if let Some(node) = self.nodes.get(&id) {
                    let marker = if node.is_draft() {
                        "draft"
                    } else if node.result.is_some() {
                        "cached"
                    } else {
                        "pending"
                    };
                    let inputs: Vec<String> = node
                        .inputs
                        .iter()
                        .map(|e| format!("{}:{}", e.role, e.from))
                        .collect();
                    out.push_str(&format!(
                        "  [{}] {} ({}) <- [{}]\n",
                        id,
                        node.node_type,
                        marker,
                        inputs.join(", ")
                    ));
                }
            }
        }
        out
    }
}
