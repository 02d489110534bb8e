//! Task registry: the single shared-state surface of the worker
//!
//! One mutex guards the whole id -> entry map. Entries are removed only
//! by explicit cleanup, never implicitly, so a slow poller can never
//! race a removal. Cancellation kills the entry's run handle forcibly
//! and flips the status; cancelling a terminal or unknown task is a
//! "not found" no-op.

use std::collections::HashMap;

use parking_lot::Mutex;

use flow_engine::EvalOutcome;

use crate::error::{Result, WorkerError};
use crate::task::{result_type, StatusReport, TaskId, TaskStatus};

/// Handle used to interrupt an in-flight run
pub enum RunHandle {
    /// Child evaluator process; killed without a graceful window
    Process(tokio::process::Child),
    /// In-process evaluation task
    Task(tokio::task::AbortHandle),
}

/// State of one dispatched task
pub struct TaskEntry {
    pub status: TaskStatus,
    pub progress: Option<f32>,
    pub file_ref: Option<String>,
    pub error_message: Option<String>,
    pub results: Option<serde_json::Value>,
    pub result_type: Option<String>,
    /// Binary columnar payload for `result_type == "table"`
    pub data: Option<Vec<u8>>,
    handle: Option<RunHandle>,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            status: TaskStatus::Starting,
            progress: None,
            file_ref: None,
            error_message: None,
            results: None,
            result_type: None,
            data: None,
            handle: None,
        }
    }

    fn report(&self, task_id: &TaskId) -> StatusReport {
        StatusReport {
            background_task_id: task_id.clone(),
            status: self.status,
            file_ref: self.file_ref.clone(),
            progress: self.progress,
            error_message: self.error_message.clone(),
            results: self.results.clone(),
            result_type: self.result_type.clone(),
        }
    }
}

/// What the process monitor observed for a child
pub(crate) enum ProcessPoll {
    /// No entry or no process handle
    Missing,
    /// Entry already reached a terminal status
    Terminal,
    Running,
    Exited(std::process::ExitStatus),
    Failed(String),
}

/// Thread-safe task table
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task in `Starting` state
    ///
    /// A task id maps to at most one in-flight execution.
    pub fn insert(&self, task_id: &TaskId) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(task_id) {
            return Err(WorkerError::DuplicateTask(task_id.clone()));
        }
        tasks.insert(task_id.clone(), TaskEntry::new());
        Ok(())
    }

    /// Attach the run handle used for forcible cancellation
    pub fn attach_handle(&self, task_id: &TaskId, handle: RunHandle) {
        if let Some(entry) = self.tasks.lock().get_mut(task_id) {
            entry.handle = Some(handle);
        }
    }

    /// Move a task into `Processing`
    pub fn set_processing(&self, task_id: &TaskId) {
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get_mut(task_id) {
            if !entry.status.is_terminal() {
                entry.status = TaskStatus::Processing;
                entry.progress = Some(0.0);
            }
        }
    }

    /// Update progress on a non-terminal task
    pub fn set_progress(&self, task_id: &TaskId, progress: f32) {
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get_mut(task_id) {
            if !entry.status.is_terminal() {
                entry.progress = Some(progress);
            }
        }
    }

    /// Record a successful evaluation outcome
    ///
    /// Ignored if the task already reached a terminal status (e.g. a
    /// cancel landed while the evaluation was finishing).
    pub fn complete(&self, task_id: &TaskId, outcome: EvalOutcome) {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        match outcome {
            EvalOutcome::Schema(schema) => {
                entry.results = serde_json::to_value(schema).ok();
                entry.result_type = Some(result_type::SCHEMA.to_string());
            }
            EvalOutcome::Count(count) => {
                entry.results = Some(serde_json::json!(count));
                entry.result_type = Some(result_type::COUNT.to_string());
            }
            EvalOutcome::Table(data) => {
                entry.data = Some(data);
                entry.result_type = Some(result_type::TABLE.to_string());
            }
            EvalOutcome::Written(file_ref) => {
                entry.file_ref = Some(file_ref);
                entry.result_type = Some(result_type::FILE_REF.to_string());
            }
        }
        entry.status = TaskStatus::Completed;
        entry.progress = Some(1.0);
    }

    /// Record raw completion fields (process-runner path)
    pub fn complete_raw(
        &self,
        task_id: &TaskId,
        file_ref: Option<String>,
        result_type: Option<String>,
        results: Option<serde_json::Value>,
        data: Option<Vec<u8>>,
    ) {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        entry.file_ref = file_ref;
        entry.result_type = result_type;
        entry.results = results;
        entry.data = data;
        entry.status = TaskStatus::Completed;
        entry.progress = Some(1.0);
    }

    /// Record a terminal failure
    pub fn fail(&self, task_id: &TaskId, message: impl Into<String>) {
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get_mut(task_id) {
            if !entry.status.is_terminal() {
                entry.status = TaskStatus::Error;
                entry.error_message = Some(message.into());
            }
        }
    }

    /// Forcibly cancel a task by id
    ///
    /// Kills the run handle and flips the status to `Cancelled`. Returns
    /// false ("not found") for unknown ids and for tasks that already
    /// reached a terminal status.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }
        if let Some(handle) = entry.handle.as_mut() {
            match handle {
                RunHandle::Process(child) => {
                    if let Err(e) = child.start_kill() {
                        log::warn!("failed to kill task {} process: {}", task_id, e);
                    }
                }
                RunHandle::Task(handle) => handle.abort(),
            }
        }
        entry.status = TaskStatus::Cancelled;
        true
    }

    /// Explicitly remove a task entry
    pub fn cleanup(&self, task_id: &TaskId) -> bool {
        self.tasks.lock().remove(task_id).is_some()
    }

    /// Status report for a task
    pub fn status(&self, task_id: &TaskId) -> Option<StatusReport> {
        self.tasks.lock().get(task_id).map(|e| e.report(task_id))
    }

    /// Binary result payload, if one was produced
    pub fn data(&self, task_id: &TaskId) -> Option<Vec<u8>> {
        self.tasks.lock().get(task_id).and_then(|e| e.data.clone())
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Ids of all registered tasks
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Poll the child process of a task without blocking
    pub(crate) fn poll_process(&self, task_id: &TaskId) -> ProcessPoll {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return ProcessPoll::Missing;
        };
        if entry.status.is_terminal() {
            // Reap a killed child if it already exited
            if let Some(RunHandle::Process(child)) = entry.handle.as_mut() {
                let _ = child.try_wait();
            }
            return ProcessPoll::Terminal;
        }
        match entry.handle.as_mut() {
            Some(RunHandle::Process(child)) => match child.try_wait() {
                Ok(Some(status)) => ProcessPoll::Exited(status),
                Ok(None) => ProcessPoll::Running,
                Err(e) => ProcessPoll::Failed(e.to_string()),
            },
            _ => ProcessPoll::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::TableSchema;

    fn id(s: &str) -> TaskId {
        s.to_string()
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        let registry = TaskRegistry::new();
        registry.insert(&id("t1")).unwrap();
        assert!(matches!(
            registry.insert(&id("t1")),
            Err(WorkerError::DuplicateTask(_))
        ));
    }

    #[test]
    fn test_status_transitions() {
        let registry = TaskRegistry::new();
        registry.insert(&id("t1")).unwrap();
        assert_eq!(
            registry.status(&id("t1")).unwrap().status,
            TaskStatus::Starting
        );

        registry.set_processing(&id("t1"));
        assert_eq!(
            registry.status(&id("t1")).unwrap().status,
            TaskStatus::Processing
        );

        registry.complete(&id("t1"), EvalOutcome::Count(42));
        let report = registry.status(&id("t1")).unwrap();
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.results, Some(serde_json::json!(42)));
        assert_eq!(report.result_type.as_deref(), Some(result_type::COUNT));
    }

    #[test]
    fn test_table_outcome_stores_binary() {
        let registry = TaskRegistry::new();
        registry.insert(&id("t1")).unwrap();
        registry.complete(&id("t1"), EvalOutcome::Table(vec![1, 2, 3]));

        assert_eq!(registry.data(&id("t1")), Some(vec![1, 2, 3]));
        assert_eq!(
            registry.status(&id("t1")).unwrap().result_type.as_deref(),
            Some(result_type::TABLE)
        );
    }

    #[test]
    fn test_schema_outcome_is_inline() {
        let registry = TaskRegistry::new();
        registry.insert(&id("t1")).unwrap();
        registry.complete(
            &id("t1"),
            EvalOutcome::Schema(TableSchema::from_pairs([("a", "i64")])),
        );
        let report = registry.status(&id("t1")).unwrap();
        assert_eq!(report.result_type.as_deref(), Some(result_type::SCHEMA));
        assert!(report.results.is_some());
    }

    #[test]
    fn test_cancel_semantics() {
        let registry = TaskRegistry::new();
        // Unknown id: not found
        assert!(!registry.cancel(&id("missing")));

        registry.insert(&id("t1")).unwrap();
        registry.set_processing(&id("t1"));
        assert!(registry.cancel(&id("t1")));
        assert_eq!(
            registry.status(&id("t1")).unwrap().status,
            TaskStatus::Cancelled
        );

        // Second cancel on a terminal task: not found no-op
        assert!(!registry.cancel(&id("t1")));
    }

    #[test]
    fn test_late_completion_does_not_overwrite_cancel() {
        let registry = TaskRegistry::new();
        registry.insert(&id("t1")).unwrap();
        registry.cancel(&id("t1"));

        registry.complete(&id("t1"), EvalOutcome::Count(1));
        registry.fail(&id("t1"), "too late");

        let report = registry.status(&id("t1")).unwrap();
        assert_eq!(report.status, TaskStatus::Cancelled);
        assert!(report.error_message.is_none());
    }

    #[test]
    fn test_entries_survive_until_explicit_cleanup() {
        let registry = TaskRegistry::new();
        registry.insert(&id("t1")).unwrap();
        registry.complete(&id("t1"), EvalOutcome::Count(1));

        // Terminal entries are still pollable
        assert!(registry.status(&id("t1")).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.cleanup(&id("t1")));
        assert!(registry.status(&id("t1")).is_none());
        assert!(!registry.cleanup(&id("t1")));
    }
}
