//! Flow Worker - out-of-process execution for flowmill pipelines
//!
//! This crate carries both halves of the worker dispatch protocol:
//!
//! - **Server half**: an axum service owning a `TaskRegistry` and a
//!   `TaskRunner`; each submission runs in a child evaluator process (or
//!   in-process for embedded use) and is forcibly killable by task id.
//! - **Client half**: `DispatchClient`, the engine's implementation of
//!   `flow_engine::RemoteDispatcher`. It speaks the streaming transport
//!   first and falls back to submit/poll, validating binary results by
//!   attempting to open them.
//!
//! The wire contract (operation names, status objects, stream frames)
//! lives in [`task`]; the rest of the engine never sees it.

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod registry;
pub mod runner;
pub mod server;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use client::DispatchClient;
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use registry::{RunHandle, TaskEntry, TaskRegistry};
pub use runner::{EvalResponse, EvaluatorRunner, ProcessRunner, TaskRunner};
pub use server::{poll_router, router, WorkerState};
pub use task::{StatusReport, StreamFrame, TaskId, TaskStatus, TaskSubmission};
