//! Worker server half: HTTP endpoints for both transports
//!
//! The poll transport is plain request/response: submit returns the task
//! id immediately, status is polled until terminal, and binary results
//! are fetched separately. The stream transport answers a submit with a
//! single chunked response that pushes newline-delimited JSON frames and
//! ends with a length-prefixed binary frame when there is a payload.
//!
//! Cancellation is out-of-band on both transports, keyed by task id.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::constants::timeouts;
use crate::error::WorkerError;
use crate::registry::TaskRegistry;
use crate::runner::TaskRunner;
use crate::task::{encode_binary_frame, StreamFrame, TaskId, TaskStatus, TaskSubmission};

/// Shared state behind every handler
#[derive(Clone)]
pub struct WorkerState {
    pub registry: Arc<TaskRegistry>,
    pub runner: Arc<dyn TaskRunner>,
}

/// Full router: poll transport plus the streaming endpoint
pub fn router(state: WorkerState) -> Router {
    poll_router(state.clone()).route("/submit_stream", post(submit_stream).with_state(state))
}

/// Poll-only router, for hosts that cannot hold streaming responses
pub fn poll_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/submit", post(submit))
        .route("/status/:id", get(status))
        .route("/result/:id", get(result))
        .route("/cancel/:id", post(cancel))
        .route("/task/:id", delete(cleanup))
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

fn spawn_error_response(err: &WorkerError) -> Response {
    let status = match err {
        WorkerError::DuplicateTask(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit(
    State(state): State<WorkerState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    let task_id = submission.task_id.clone();
    match state.runner.spawn(submission, state.registry.clone()).await {
        Ok(()) => {
            log::debug!("task {}: accepted", task_id);
            Json(serde_json::json!({"task_id": task_id})).into_response()
        }
        Err(e) => {
            log::warn!("task {}: rejected: {}", task_id, e);
            spawn_error_response(&e)
        }
    }
}

async fn status(State(state): State<WorkerState>, Path(id): Path<TaskId>) -> Response {
    match state.registry.status(&id) {
        Some(report) => Json(report).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "task not found"),
    }
}

async fn result(State(state): State<WorkerState>, Path(id): Path<TaskId>) -> Response {
    match state.registry.data(&id) {
        Some(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no result for task"),
    }
}

async fn cancel(State(state): State<WorkerState>, Path(id): Path<TaskId>) -> Response {
    let cancelled = state.registry.cancel(&id);
    if cancelled {
        log::info!("task {}: cancelled", id);
    }
    Json(serde_json::json!({"cancelled": cancelled})).into_response()
}

async fn cleanup(State(state): State<WorkerState>, Path(id): Path<TaskId>) -> Response {
    Json(serde_json::json!({"removed": state.registry.cleanup(&id)})).into_response()
}

async fn submit_stream(
    State(state): State<WorkerState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    let task_id = submission.task_id.clone();
    if let Err(e) = state.runner.spawn(submission, state.registry.clone()).await {
        return spawn_error_response(&e);
    }

    let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
    tokio::spawn(stream_task(state.registry.clone(), task_id, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn send_frame(tx: &mpsc::Sender<Vec<u8>>, frame: StreamFrame) -> bool {
    match frame.encode() {
        Ok(bytes) => tx.send(bytes).await.is_ok(),
        Err(_) => false,
    }
}

/// Follow one task in the registry and push frames until terminal
///
/// Progress frames are emitted on every progress change; a `complete`
/// frame is followed by one binary frame iff the task produced a binary
/// payload. A dropped receiver (client gone) just ends the relay.
async fn stream_task(registry: Arc<TaskRegistry>, task_id: TaskId, tx: mpsc::Sender<Vec<u8>>) {
    if !send_frame(
        &tx,
        StreamFrame::Progress {
            progress: 0.0,
            message: None,
        },
    )
    .await
    {
        return;
    }

    let mut last_progress = 0.0f32;
    loop {
        let Some(report) = registry.status(&task_id) else {
            let _ = send_frame(
                &tx,
                StreamFrame::Error {
                    error_message: "task not found".to_string(),
                },
            )
            .await;
            return;
        };

        match report.status {
            TaskStatus::Starting | TaskStatus::Processing => {
                if let Some(progress) = report.progress {
                    if progress > last_progress {
                        last_progress = progress;
                        if !send_frame(
                            &tx,
                            StreamFrame::Progress {
                                progress,
                                message: None,
                            },
                        )
                        .await
                        {
                            return;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(timeouts::STREAM_POLL_MS)).await;
            }
            TaskStatus::Completed => {
                let data = registry.data(&task_id);
                let frame = StreamFrame::Complete {
                    file_ref: report.file_ref,
                    result_type: report.result_type,
                    has_result: data.is_some(),
                    results: report.results,
                };
                if !send_frame(&tx, frame).await {
                    return;
                }
                if let Some(data) = data {
                    let _ = tx.send(encode_binary_frame(&data)).await;
                }
                return;
            }
            TaskStatus::Error | TaskStatus::UnknownError => {
                let message = report
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string());
                let _ = send_frame(&tx, StreamFrame::Error { error_message: message }).await;
                return;
            }
            TaskStatus::Cancelled => {
                let _ = send_frame(
                    &tx,
                    StreamFrame::Error {
                        error_message: "task cancelled".to_string(),
                    },
                )
                .await;
                return;
            }
        }
    }
}
