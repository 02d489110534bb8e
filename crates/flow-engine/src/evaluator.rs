//! The plan evaluator seam
//!
//! The engine never executes dataframe operations itself; it hands a
//! serialized plan and an operation type to a `PlanEvaluator` and gets a
//! schema, a row count, a binary table, or a file reference back. The
//! same operation vocabulary travels to out-of-process workers.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::TableSchema;

/// Operation applied to a serialized plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Materialize the full result into the cache
    Store,
    /// Resolve the output schema
    CalculateSchema,
    /// Count result rows
    CalculateNumberOfRecords,
    /// Write the result to its output target
    WriteOutput,
    /// Materialize a bounded preview sample
    StoreSample,
    /// Run a fuzzy-match between two inputs
    FuzzyMatch,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationType::Store => "store",
            OperationType::CalculateSchema => "calculate_schema",
            OperationType::CalculateNumberOfRecords => "calculate_number_of_records",
            OperationType::WriteOutput => "write_output",
            OperationType::StoreSample => "store_sample",
            OperationType::FuzzyMatch => "fuzzy_match",
        };
        write!(f, "{}", name)
    }
}

/// Result of evaluating a plan
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Schema(TableSchema),
    Count(u64),
    /// Binary columnar table payload
    Table(Vec<u8>),
    /// Reference to a written file
    Written(String),
}

/// What opening a binary table reveals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub schema: TableSchema,
    pub row_count: u64,
}

/// Narrow capability onto the external dataframe library
///
/// Plan bytes are opaque: the engine never inspects them. `open_table`
/// doubles as the integrity probe for binary results returned by remote
/// workers; a payload that cannot be opened is treated as corrupt.
#[async_trait]
pub trait PlanEvaluator: Send + Sync {
    /// Evaluate a serialized plan under the given operation
    async fn evaluate(
        &self,
        op: OperationType,
        plan: &[u8],
        cache_dir: &Path,
    ) -> Result<EvalOutcome>;

    /// Attempt to open a binary table payload
    fn open_table(&self, data: &[u8]) -> Result<TableSummary>;
}
