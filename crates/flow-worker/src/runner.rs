//! Task runners: how the worker actually executes a submission
//!
//! `ProcessRunner` hands each task to an external evaluator binary in
//! its own process, which is what makes forcible cancellation (process
//! kill) possible. `EvaluatorRunner` runs an injected `PlanEvaluator`
//! in-process for embedded and test use.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use flow_engine::PlanEvaluator;

use crate::constants::{defaults, timeouts};
use crate::error::{Result, WorkerError};
use crate::registry::{ProcessPoll, RunHandle, TaskRegistry};
use crate::task::TaskSubmission;

/// Starts the execution of a submission and registers its run handle
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Register the task and start it; returns once it is running
    async fn spawn(&self, submission: TaskSubmission, registry: Arc<TaskRegistry>) -> Result<()>;
}

// ── In-process runner ───────────────────────────────────────────────

/// Runs evaluations on the worker's own runtime
///
/// Cancellation aborts the evaluation task; used when the worker is
/// embedded or under test, where process isolation is not needed.
pub struct EvaluatorRunner {
    evaluator: Arc<dyn PlanEvaluator>,
}

impl EvaluatorRunner {
    pub fn new(evaluator: Arc<dyn PlanEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl TaskRunner for EvaluatorRunner {
    async fn spawn(&self, submission: TaskSubmission, registry: Arc<TaskRegistry>) -> Result<()> {
        registry.insert(&submission.task_id)?;
        let evaluator = self.evaluator.clone();
        let task_id = submission.task_id.clone();
        let reg = registry.clone();

        let handle = tokio::spawn(async move {
            reg.set_processing(&submission.task_id);
            let cache_dir = PathBuf::from(&submission.cache_dir);
            match evaluator
                .evaluate(
                    submission.operation_type,
                    &submission.serialized_plan,
                    &cache_dir,
                )
                .await
            {
                Ok(outcome) => reg.complete(&submission.task_id, outcome),
                Err(e) => reg.fail(&submission.task_id, e.to_string()),
            }
        });
        registry.attach_handle(&task_id, RunHandle::Task(handle.abort_handle()));
        Ok(())
    }
}

// ── Process runner ──────────────────────────────────────────────────

/// Response contract of the external evaluator binary
///
/// The binary is invoked as `<evaluator> --input <submission.json>
/// --output <response.json>`; it reads a `TaskSubmission`, evaluates the
/// plan, and writes this structure before exiting.
#[derive(Debug, Serialize, Deserialize)]
pub struct EvalResponse {
    /// "ok" or "error"
    pub status: String,
    pub error_message: Option<String>,
    pub result_type: Option<String>,
    pub file_ref: Option<String>,
    pub results: Option<serde_json::Value>,
    /// Base64 binary payload for table results
    pub data_base64: Option<String>,
}

/// Runs each task in a child evaluator process
pub struct ProcessRunner {
    evaluator_bin: PathBuf,
}

impl ProcessRunner {
    pub fn new(evaluator_bin: PathBuf) -> Self {
        Self { evaluator_bin }
    }

    /// Locate the evaluator binary on PATH
    pub fn discover() -> Result<Self> {
        let bin = which::which(defaults::EVALUATOR_BIN)
            .map_err(|e| WorkerError::Spawn(format!("{}: {}", defaults::EVALUATOR_BIN, e)))?;
        Ok(Self::new(bin))
    }

    async fn read_response(path: &Path) -> Result<EvalResponse> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Watch a child until it exits, then harvest its response file
    ///
    /// A child that is killed (cancel) is observed after the entry is
    /// already terminal and leaves the registry untouched.
    async fn monitor(
        registry: Arc<TaskRegistry>,
        task_id: String,
        response_path: PathBuf,
    ) {
        loop {
            tokio::time::sleep(Duration::from_millis(timeouts::MONITOR_INTERVAL_MS)).await;
            match registry.poll_process(&task_id) {
                ProcessPoll::Running => continue,
                ProcessPoll::Missing | ProcessPoll::Terminal => break,
                ProcessPoll::Failed(message) => {
                    registry.fail(&task_id, format!("process wait failed: {}", message));
                    break;
                }
                ProcessPoll::Exited(status) => {
                    if !status.success() {
                        registry.fail(
                            &task_id,
                            format!("evaluator process exited with {}", status),
                        );
                        break;
                    }
                    match Self::read_response(&response_path).await {
                        Ok(response) if response.status == "ok" => {
                            use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
                            let data = match &response.data_base64 {
                                Some(encoded) => match BASE64.decode(encoded) {
                                    Ok(bytes) => Some(bytes),
                                    Err(e) => {
                                        registry.fail(
                                            &task_id,
                                            format!("malformed result payload: {}", e),
                                        );
                                        break;
                                    }
                                },
                                None => None,
                            };
                            registry.complete_raw(
                                &task_id,
                                response.file_ref,
                                response.result_type,
                                response.results,
                                data,
                            );
                        }
                        Ok(response) => {
                            let message = response
                                .error_message
                                .unwrap_or_else(|| "evaluator reported an error".to_string());
                            registry.fail(&task_id, message);
                        }
                        Err(e) => {
                            registry.fail(&task_id, format!("unreadable evaluator response: {}", e));
                        }
                    }
                    break;
                }
            }
        }
        let _ = tokio::fs::remove_file(&response_path).await;
    }
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    async fn spawn(&self, submission: TaskSubmission, registry: Arc<TaskRegistry>) -> Result<()> {
        registry.insert(&submission.task_id)?;

        let cache_dir = PathBuf::from(&submission.cache_dir);
        tokio::fs::create_dir_all(&cache_dir).await?;
        let input_path = cache_dir.join(format!("task-{}.json", submission.task_id));
        let response_path = cache_dir.join(format!("task-{}.out.json", submission.task_id));
        tokio::fs::write(&input_path, serde_json::to_vec(&submission)?).await?;

        let child = Command::new(&self.evaluator_bin)
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&response_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                registry.fail(&submission.task_id, format!("spawn failed: {}", e));
                WorkerError::Spawn(format!("{}: {}", self.evaluator_bin.display(), e))
            })?;

        log::debug!(
            "task {}: spawned evaluator pid {:?}",
            submission.task_id,
            child.id()
        );
        registry.attach_handle(&submission.task_id, RunHandle::Process(child));
        registry.set_processing(&submission.task_id);

        tokio::spawn(Self::monitor(
            registry,
            submission.task_id,
            response_path,
        ));
        Ok(())
    }
}
