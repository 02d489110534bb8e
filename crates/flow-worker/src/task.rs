//! Wire contract for dispatched tasks
//!
//! Both transports share one vocabulary: a `TaskSubmission` goes in, and
//! either a stream of frames (progress, then complete/error, then an
//! optional length-prefixed binary frame) or a pollable `StatusReport`
//! comes back. Plan bytes travel base64-encoded inside JSON.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use flow_engine::OperationType;

/// Task identifier, unique per in-flight execution
pub type TaskId = String;

/// Labels for the `result_type` field of reports and complete frames
pub mod result_type {
    /// Binary columnar payload (fetched via /result or the binary frame)
    pub const TABLE: &str = "table";
    /// Row count carried inline in `results`
    pub const COUNT: &str = "count";
    /// Schema carried inline in `results`
    pub const SCHEMA: &str = "schema";
    /// Path reference to a materialized file
    pub const FILE_REF: &str = "file_ref";
}

/// Lifecycle status of a dispatched task
///
/// Only `Starting` and `Processing` are non-terminal. `UnknownError` is
/// treated as a terminal failure identical to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Starting,
    Processing,
    Completed,
    Error,
    UnknownError,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Starting | TaskStatus::Processing)
    }
}

/// Submission payload accepted by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub operation_type: OperationType,
    #[serde(with = "plan_bytes")]
    pub serialized_plan: Vec<u8>,
    pub cache_dir: String,
}

/// Poll-transport status object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub background_task_id: TaskId,
    pub status: TaskStatus,
    pub file_ref: Option<String>,
    pub progress: Option<f32>,
    pub error_message: Option<String>,
    /// Small inline results (row count, schema)
    pub results: Option<serde_json::Value>,
    pub result_type: Option<String>,
}

/// One JSON frame on the stream transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Progress {
        progress: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Terminal success; a binary frame follows iff `has_result`
    Complete {
        file_ref: Option<String>,
        result_type: Option<String>,
        has_result: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<serde_json::Value>,
    },
    Error {
        error_message: String,
    },
}

impl StreamFrame {
    /// Encode as one newline-delimited JSON line
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Length prefix of the binary frame, big-endian u64
pub const BINARY_LEN_PREFIX: usize = 8;

/// Encode the binary result frame: length prefix plus payload
pub fn encode_binary_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(BINARY_LEN_PREFIX + data.len());
    frame.extend_from_slice(&(data.len() as u64).to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

mod plan_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
