//! Test evaluators for runner, server, and client tests

use std::path::Path;

use async_trait::async_trait;

use flow_engine::{
    EvalOutcome, FlowError, OperationType, PlanEvaluator, TableSchema, TableSummary,
};

fn open_json_table(data: &[u8]) -> flow_engine::Result<TableSummary> {
    let rows: Vec<serde_json::Value> = serde_json::from_slice(data)
        .map_err(|e| FlowError::Integrity(format!("cannot open table: {}", e)))?;
    Ok(TableSummary {
        schema: TableSchema::default(),
        row_count: rows.len() as u64,
    })
}

/// Deterministic evaluator over the raw plan bytes
pub struct EchoEvaluator;

#[async_trait]
impl PlanEvaluator for EchoEvaluator {
    async fn evaluate(
        &self,
        op: OperationType,
        plan: &[u8],
        cache_dir: &Path,
    ) -> flow_engine::Result<EvalOutcome> {
        match op {
            OperationType::CalculateNumberOfRecords => Ok(EvalOutcome::Count(plan.len() as u64)),
            OperationType::CalculateSchema => {
                Ok(EvalOutcome::Schema(TableSchema::from_pairs([("a", "i64")])))
            }
            OperationType::StoreSample | OperationType::FuzzyMatch => {
                Ok(EvalOutcome::Table(plan.to_vec()))
            }
            OperationType::Store | OperationType::WriteOutput => {
                let path = cache_dir.join("out.json");
                std::fs::write(&path, plan)?;
                Ok(EvalOutcome::Written(path.display().to_string()))
            }
        }
    }

    fn open_table(&self, data: &[u8]) -> flow_engine::Result<TableSummary> {
        open_json_table(data)
    }
}

/// Never finishes; used to exercise cancellation
pub struct BlockingEvaluator;

#[async_trait]
impl PlanEvaluator for BlockingEvaluator {
    async fn evaluate(
        &self,
        _op: OperationType,
        _plan: &[u8],
        _cache_dir: &Path,
    ) -> flow_engine::Result<EvalOutcome> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(FlowError::computation("unreachable"))
    }

    fn open_table(&self, data: &[u8]) -> flow_engine::Result<TableSummary> {
        open_json_table(data)
    }
}

/// Reports success but returns an unopenable payload
pub struct BrokenEvaluator;

#[async_trait]
impl PlanEvaluator for BrokenEvaluator {
    async fn evaluate(
        &self,
        _op: OperationType,
        _plan: &[u8],
        _cache_dir: &Path,
    ) -> flow_engine::Result<EvalOutcome> {
        Ok(EvalOutcome::Table(vec![0xff, 0x00, 0xba, 0xad]))
    }

    fn open_table(&self, data: &[u8]) -> flow_engine::Result<TableSummary> {
        open_json_table(data)
    }
}

/// Always fails the evaluation
pub struct FailEvaluator;

#[async_trait]
impl PlanEvaluator for FailEvaluator {
    async fn evaluate(
        &self,
        _op: OperationType,
        _plan: &[u8],
        _cache_dir: &Path,
    ) -> flow_engine::Result<EvalOutcome> {
        Err(FlowError::computation("evaluation exploded"))
    }

    fn open_table(&self, data: &[u8]) -> flow_engine::Result<TableSummary> {
        open_json_table(data)
    }
}
