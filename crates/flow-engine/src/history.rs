//! Undo/redo over compressed graph snapshots
//!
//! Every tracked mutation pushes the pre-mutation graph state onto the
//! undo stack. Snapshots are full declarative copies (`GraphSpec`) so any
//! mutation can be reverted without inverse operations; zstd keeps memory
//! proportional to graph size rather than edit count.
//!
//! Undoing to the first snapshot restores the same bytes a save file
//! holds, so "undo to start" and "reload from file" are the same state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::graph::FlowGraph;
use crate::types::{GraphSpec, NodeId};

/// Compression level for snapshot payloads
const SNAPSHOT_ZSTD_LEVEL: i32 = 3;

/// Kind of tracked mutation a snapshot precedes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddNode,
    FinalizeNode,
    RemoveNode,
    Connect,
    Disconnect,
    UpdateSettings,
}

/// An immutable compressed copy of graph state
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub action: ActionType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// The node most affected by the mutation, when one exists
    pub node_id: Option<NodeId>,
    compressed: Vec<u8>,
}

impl Snapshot {
    /// Capture the graph's declarative state
    pub fn capture(
        graph: &FlowGraph,
        action: ActionType,
        description: impl Into<String>,
        node_id: Option<NodeId>,
    ) -> Result<Self> {
        let json = serde_json::to_vec(&graph.to_spec())?;
        let compressed = zstd::encode_all(&json[..], SNAPSHOT_ZSTD_LEVEL)
            .map_err(|e| FlowError::Compression(e.to_string()))?;
        Ok(Self {
            action,
            description: description.into(),
            timestamp: Utc::now(),
            node_id,
            compressed,
        })
    }

    /// Decompress back into a declarative graph state
    pub fn restore(&self) -> Result<GraphSpec> {
        let json = zstd::decode_all(&self.compressed[..])
            .map_err(|e| FlowError::Compression(e.to_string()))?;
        let spec: GraphSpec = serde_json::from_slice(&json)?;
        Ok(spec)
    }

    /// Compressed payload size in bytes
    pub fn size(&self) -> usize {
        self.compressed.len()
    }
}

/// Result of an undo/redo attempt
///
/// An empty stack yields `success: false` rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryOutcome {
    pub success: bool,
    /// Description of the reverted/reapplied action on success
    pub description: Option<String>,
}

impl HistoryOutcome {
    fn empty() -> Self {
        Self {
            success: false,
            description: None,
        }
    }

    fn applied(description: String) -> Self {
        Self {
            success: true,
            description: Some(description),
        }
    }
}

/// Read-only projection of both stacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_descriptions: Vec<String>,
    pub redo_descriptions: Vec<String>,
}

/// Snapshot-based undo/redo manager for one graph
pub struct HistoryManager {
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    max_entries: usize,
    max_bytes: usize,
}

impl HistoryManager {
    /// Create a manager bounded by entry count and compressed-byte budget
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    /// Capture the current graph state before a tracked mutation
    ///
    /// Clears the redo stack: a new mutation after an undo forks history.
    pub fn capture_snapshot(
        &mut self,
        graph: &FlowGraph,
        action: ActionType,
        description: impl Into<String>,
        node_id: Option<NodeId>,
    ) -> Result<()> {
        let snapshot = Snapshot::capture(graph, action, description, node_id)?;
        self.push(snapshot);
        Ok(())
    }

    /// Push an already-captured pre-mutation snapshot
    ///
    /// Used by callers that capture before attempting a fallible mutation
    /// so a rejected mutation never pollutes history.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.redo.clear();
        self.undo.push_back(snapshot);
        self.evict();
    }

    /// Evict oldest undo entries past the count or byte budget
    fn evict(&mut self) {
        while self.undo.len() > self.max_entries {
            self.undo.pop_front();
        }
        while self.undo.len() > 1 && self.total_bytes() > self.max_bytes {
            self.undo.pop_front();
        }
    }

    /// Revert the most recent tracked mutation
    ///
    /// Pushes the current state onto the redo stack, then restores the
    /// popped snapshot into `graph`.
    pub fn undo(&mut self, graph: &mut FlowGraph) -> Result<HistoryOutcome> {
        let Some(snapshot) = self.undo.pop_back() else {
            return Ok(HistoryOutcome::empty());
        };
        let current = Snapshot::capture(
            graph,
            snapshot.action,
            snapshot.description.clone(),
            snapshot.node_id,
        )?;
        self.redo.push(current);
        graph.apply_spec(snapshot.restore()?);
        log::debug!("undo: {}", snapshot.description);
        Ok(HistoryOutcome::applied(snapshot.description))
    }

    /// Reapply the most recently undone mutation
    pub fn redo(&mut self, graph: &mut FlowGraph) -> Result<HistoryOutcome> {
        let Some(snapshot) = self.redo.pop() else {
            return Ok(HistoryOutcome::empty());
        };
        let current = Snapshot::capture(
            graph,
            snapshot.action,
            snapshot.description.clone(),
            snapshot.node_id,
        )?;
        self.undo.push_back(current);
        graph.apply_spec(snapshot.restore()?);
        log::debug!("redo: {}", snapshot.description);
        Ok(HistoryOutcome::applied(snapshot.description))
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Read-only projection of both stacks; never mutates either
    pub fn history_state(&self) -> HistoryState {
        HistoryState {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            undo_descriptions: self.undo.iter().map(|s| s.description.clone()).collect(),
            redo_descriptions: self.redo.iter().map(|s| s.description.clone()).collect(),
        }
    }

    /// Number of undo entries held
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Total compressed bytes across both stacks
    pub fn total_bytes(&self) -> usize {
        self.undo.iter().map(|s| s.size()).sum::<usize>()
            + self.redo.iter().map(|s| s.size()).sum::<usize>()
    }

    /// Drop all history (e.g. after loading a new document)
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50, 16 * 1024 * 1024)
    }
}
