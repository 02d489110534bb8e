//! Dispatch client: the engine's handle onto a remote worker
//!
//! `DispatchClient` implements `flow_engine::RemoteDispatcher`. It tries
//! the streaming transport first and falls back to submit/poll when the
//! stream endpoint is unavailable; a stream that breaks after a
//! successful submit degrades to polling the already-running task
//! instead of resubmitting. Binary results are validated by attempting
//! to open them; a payload that cannot be opened is an integrity error
//! even when the worker reported success.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;

use flow_engine::{
    CancelToken, DispatchOutcome, FlowError, OperationType, PlanEvaluator, RemoteDispatcher,
    TableSchema,
};

use crate::constants::timeouts;
use crate::error::{Result, WorkerError};
use crate::task::{result_type, StatusReport, StreamFrame, TaskStatus, TaskSubmission, BINARY_LEN_PREFIX};

/// How a stream attempt ended short of an outcome
enum StreamFailure {
    /// The endpoint itself is unusable; the task was never submitted
    Unavailable(String),
    /// The task was submitted but the stream broke afterwards
    Broken(String),
    /// The worker answered with a real task-level result
    Worker(WorkerError),
}

impl From<WorkerError> for StreamFailure {
    fn from(err: WorkerError) -> Self {
        StreamFailure::Worker(err)
    }
}

/// Client half of the worker dispatch protocol
pub struct DispatchClient {
    base_url: String,
    http: reqwest::Client,
    /// Used to validate binary results by attempting to open them
    opener: Arc<dyn PlanEvaluator>,
}

impl DispatchClient {
    pub fn new(base_url: impl Into<String>, opener: Arc<dyn PlanEvaluator>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
            opener,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Out-of-band cancel, keyed by task id
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let response = self
            .http
            .post(self.url(&format!("cancel/{}", task_id)))
            .send()
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        Ok(value["cancelled"].as_bool().unwrap_or(false))
    }

    async fn cleanup_task(&self, task_id: &str) {
        let _ = self
            .http
            .delete(self.url(&format!("task/{}", task_id)))
            .send()
            .await;
    }

    /// Map terminal report fields into an engine-facing outcome,
    /// validating any binary payload
    fn build_outcome(
        &self,
        file_ref: Option<String>,
        kind: Option<String>,
        results: Option<serde_json::Value>,
        data: Option<Vec<u8>>,
    ) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();
        match kind.as_deref() {
            Some(result_type::TABLE) => {
                let data = data.ok_or_else(|| {
                    WorkerError::Integrity("worker reported a table but sent no payload".to_string())
                })?;
                self.opener
                    .open_table(&data)
                    .map_err(|e| WorkerError::Integrity(e.to_string()))?;
                outcome.data = Some(data);
            }
            Some(result_type::COUNT) => {
                outcome.row_count = results.and_then(|v| v.as_u64());
            }
            Some(result_type::SCHEMA) => {
                outcome.schema = results
                    .map(serde_json::from_value::<TableSchema>)
                    .transpose()?;
            }
            _ => {
                outcome.file_ref = file_ref;
            }
        }
        Ok(outcome)
    }

    // ── Stream transport ────────────────────────────────────────────

    async fn dispatch_stream(
        &self,
        submission: &TaskSubmission,
        cancel: &CancelToken,
    ) -> std::result::Result<DispatchOutcome, StreamFailure> {
        let response = self
            .http
            .post(self.url("submit_stream"))
            .json(submission)
            .send()
            .await
            .map_err(|e| StreamFailure::Unavailable(e.to_string()))?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED
        ) {
            return Err(StreamFailure::Unavailable(format!(
                "stream endpoint answered {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamFailure::Worker(WorkerError::task(format!(
                "stream submit rejected: {}",
                body
            ))));
        }

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut complete: Option<StreamFrame> = None;

        loop {
            // Drain whole JSON frames until the terminal one
            while complete.is_none() {
                let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                    break;
                };
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let frame: StreamFrame =
                    serde_json::from_slice(&line).map_err(WorkerError::from)?;
                match frame {
                    // Ignorable by synchronous clients
                    StreamFrame::Progress { .. } => {}
                    StreamFrame::Error { error_message } => {
                        return Err(StreamFailure::Worker(WorkerError::Task(error_message)));
                    }
                    frame @ StreamFrame::Complete { .. } => complete = Some(frame),
                }
            }

            if let Some(StreamFrame::Complete {
                file_ref,
                result_type: kind,
                has_result,
                results,
            }) = &complete
            {
                if !has_result {
                    let outcome = self.build_outcome(
                        file_ref.clone(),
                        kind.clone(),
                        results.clone(),
                        None,
                    )?;
                    self.cleanup_task(&submission.task_id).await;
                    return Ok(outcome);
                }
                // Binary frame: length prefix, then payload
                if buf.len() >= BINARY_LEN_PREFIX {
                    let declared =
                        u64::from_be_bytes(buf[..BINARY_LEN_PREFIX].try_into().map_err(|_| {
                            WorkerError::Integrity("malformed binary frame".to_string())
                        })?) as usize;
                    if buf.len() >= BINARY_LEN_PREFIX + declared {
                        let data = buf[BINARY_LEN_PREFIX..BINARY_LEN_PREFIX + declared].to_vec();
                        let outcome = self.build_outcome(
                            file_ref.clone(),
                            kind.clone(),
                            results.clone(),
                            Some(data),
                        )?;
                        self.cleanup_task(&submission.task_id).await;
                        return Ok(outcome);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.cancel_task(&submission.task_id).await;
                    return Err(StreamFailure::Worker(WorkerError::Cancelled));
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Err(StreamFailure::Broken(e.to_string())),
                    None => {
                        return Err(StreamFailure::Broken(
                            "stream ended before a terminal frame".to_string(),
                        ))
                    }
                },
            }
        }
    }

    // ── Poll transport ──────────────────────────────────────────────

    async fn dispatch_poll(
        &self,
        submission: &TaskSubmission,
        submit: bool,
        cancel: &CancelToken,
    ) -> Result<DispatchOutcome> {
        if submit {
            let response = self
                .http
                .post(self.url("submit"))
                .json(submission)
                .send()
                .await
                .map_err(|e| WorkerError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(WorkerError::task(format!("submit rejected: {}", body)));
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.cancel_task(&submission.task_id).await;
                    return Err(WorkerError::Cancelled);
                }
                _ = tokio::time::sleep(Duration::from_millis(timeouts::POLL_INTERVAL_MS)) => {}
            }

            let response = self
                .http
                .get(self.url(&format!("status/{}", submission.task_id)))
                .send()
                .await
                .map_err(|e| WorkerError::Transport(e.to_string()))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(WorkerError::UnknownTask(submission.task_id.clone()));
            }
            if !response.status().is_success() {
                return Err(WorkerError::transport(format!(
                    "status poll answered {}",
                    response.status()
                )));
            }
            let report: StatusReport = response
                .json()
                .await
                .map_err(|e| WorkerError::Transport(e.to_string()))?;

            match report.status {
                TaskStatus::Starting | TaskStatus::Processing => continue,
                TaskStatus::Completed => {
                    let data = if report.result_type.as_deref() == Some(result_type::TABLE) {
                        let response = self
                            .http
                            .get(self.url(&format!("result/{}", submission.task_id)))
                            .send()
                            .await
                            .map_err(|e| WorkerError::Transport(e.to_string()))?;
                        if !response.status().is_success() {
                            return Err(WorkerError::Integrity(
                                "worker reported a table but sent no payload".to_string(),
                            ));
                        }
                        Some(
                            response
                                .bytes()
                                .await
                                .map_err(|e| WorkerError::Transport(e.to_string()))?
                                .to_vec(),
                        )
                    } else {
                        None
                    };
                    let outcome = self.build_outcome(
                        report.file_ref,
                        report.result_type,
                        report.results,
                        data,
                    )?;
                    self.cleanup_task(&submission.task_id).await;
                    return Ok(outcome);
                }
                TaskStatus::Error | TaskStatus::UnknownError => {
                    let message = report
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string());
                    self.cleanup_task(&submission.task_id).await;
                    return Err(WorkerError::Task(message));
                }
                TaskStatus::Cancelled => {
                    self.cleanup_task(&submission.task_id).await;
                    return Err(WorkerError::Cancelled);
                }
            }
        }
    }
}

#[async_trait]
impl RemoteDispatcher for DispatchClient {
    async fn dispatch(
        &self,
        op: OperationType,
        plan: &[u8],
        cache_dir: &Path,
        cancel: &CancelToken,
    ) -> flow_engine::Result<DispatchOutcome> {
        let submission = TaskSubmission {
            task_id: uuid::Uuid::new_v4().to_string(),
            operation_type: op,
            serialized_plan: plan.to_vec(),
            cache_dir: cache_dir.display().to_string(),
        };
        log::debug!("task {}: dispatching '{}'", submission.task_id, op);

        let result = match self.dispatch_stream(&submission, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(StreamFailure::Unavailable(message)) => {
                log::warn!(
                    "stream transport unavailable ({}); falling back to polling",
                    message
                );
                self.dispatch_poll(&submission, true, cancel).await
            }
            Err(StreamFailure::Broken(message)) => {
                log::warn!(
                    "stream broke after submit ({}); polling task {}",
                    message,
                    submission.task_id
                );
                self.dispatch_poll(&submission, false, cancel).await
            }
            Err(StreamFailure::Worker(err)) => Err(err),
        };
        result.map_err(FlowError::from)
    }
}
