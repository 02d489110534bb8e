//! Test support: tiny JSON-backed behaviors and a mock evaluator
//!
//! Plans here are JSON trees that only `MockEvaluator` understands; the
//! engine under test treats them as opaque bytes, exactly as it would
//! treat real serialized dataframe plans.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::behavior::{BehaviorContext, BehaviorRegistry, NodeBehavior};
use crate::cancel::CancelToken;
use crate::error::{FlowError, Result};
use crate::evaluator::{EvalOutcome, OperationType, PlanEvaluator, TableSummary};
use crate::scheduler::{DispatchOutcome, RemoteDispatcher};
use crate::types::{EdgeRole, FieldSchema, NodeResult, TableSchema};

/// Shared invocation counters, cloneable across behaviors and mocks
#[derive(Clone, Default)]
pub struct Counters {
    pub behavior_calls: Arc<AtomicUsize>,
    pub aggregate_calls: Arc<AtomicUsize>,
    pub evaluations: Arc<AtomicUsize>,
}

/// Three source rows used by the filter/aggregate scenario
pub fn scenario_rows() -> Value {
    json!([
        {"region": "east", "quantity": 5},
        {"region": "east", "quantity": 12},
        {"region": "west", "quantity": 20}
    ])
}

fn schema_of(rows: &[Value]) -> TableSchema {
    let Some(first) = rows.first().and_then(|r| r.as_object()) else {
        return TableSchema::default();
    };
    TableSchema {
        fields: first
            .iter()
            .map(|(name, value)| FieldSchema {
                name: name.clone(),
                dtype: match value {
                    Value::Number(_) => "f64".to_string(),
                    Value::String(_) => "str".to_string(),
                    Value::Bool(_) => "bool".to_string(),
                    _ => "json".to_string(),
                },
            })
            .collect(),
    }
}

fn parse_plan(plan: &[u8]) -> Result<Value> {
    serde_json::from_slice(plan).map_err(FlowError::Serialization)
}

fn input_plan_value(cx: &BehaviorContext<'_>) -> Result<Value> {
    let input = cx.require_input(EdgeRole::Main)?;
    parse_plan(&input.plan)
}

// ── Behaviors ───────────────────────────────────────────────────────

/// Emits the rows given in its settings
pub struct SourceBehavior {
    counters: Counters,
}

#[async_trait]
impl NodeBehavior for SourceBehavior {
    fn node_type(&self) -> &str {
        "read"
    }

    fn validate_settings(&self, settings: &Value) -> Result<()> {
        if settings.get("rows").map(|r| r.is_array()) == Some(true) {
            Ok(())
        } else {
            Err(FlowError::computation("'rows' must be an array"))
        }
    }

    fn predict_schema(&self, settings: &Value, _inputs: &[TableSchema]) -> Result<TableSchema> {
        let rows = settings["rows"].as_array().cloned().unwrap_or_default();
        Ok(schema_of(&rows))
    }

    async fn execute(&self, cx: BehaviorContext<'_>) -> Result<NodeResult> {
        self.counters.behavior_calls.fetch_add(1, Ordering::SeqCst);
        let rows = cx.settings["rows"].clone();
        let plan = serde_json::to_vec(&json!({"rows": rows}))?;
        let schema = self.predict_schema(cx.settings, &[])?;
        Ok(NodeResult::new(schema, plan))
    }
}

/// Keeps rows whose column exceeds a threshold
pub struct FilterBehavior {
    counters: Counters,
}

#[async_trait]
impl NodeBehavior for FilterBehavior {
    fn node_type(&self) -> &str {
        "filter"
    }

    fn validate_settings(&self, settings: &Value) -> Result<()> {
        match (settings.get("column"), settings.get("gt")) {
            (Some(Value::String(_)), Some(v)) if v.is_number() => Ok(()),
            _ => Err(FlowError::computation("expected 'column' and numeric 'gt'")),
        }
    }

    fn predict_schema(&self, _settings: &Value, inputs: &[TableSchema]) -> Result<TableSchema> {
        Ok(inputs.first().cloned().unwrap_or_default())
    }

    async fn execute(&self, cx: BehaviorContext<'_>) -> Result<NodeResult> {
        self.counters.behavior_calls.fetch_add(1, Ordering::SeqCst);
        let input = input_plan_value(&cx)?;
        let plan = serde_json::to_vec(&json!({
            "filter": {
                "input": input,
                "column": cx.settings["column"],
                "gt": cx.settings["gt"],
            }
        }))?;
        let schema = self.predict_schema(cx.settings, &cx.input_schemas())?;
        Ok(NodeResult::new(schema, plan))
    }
}

/// Sums one column per distinct key
pub struct AggregateBehavior {
    counters: Counters,
}

#[async_trait]
impl NodeBehavior for AggregateBehavior {
    fn node_type(&self) -> &str {
        "aggregate"
    }

    fn validate_settings(&self, settings: &Value) -> Result<()> {
        match (settings.get("key"), settings.get("value")) {
            (Some(Value::String(_)), Some(Value::String(_))) => Ok(()),
            _ => Err(FlowError::computation("expected 'key' and 'value' columns")),
        }
    }

    fn predict_schema(&self, settings: &Value, _inputs: &[TableSchema]) -> Result<TableSchema> {
        let key = settings["key"].as_str().unwrap_or_default();
        let value = settings["value"].as_str().unwrap_or_default();
        Ok(TableSchema::from_pairs([(key, "str"), (value, "f64")]))
    }

    async fn execute(&self, cx: BehaviorContext<'_>) -> Result<NodeResult> {
        self.counters.behavior_calls.fetch_add(1, Ordering::SeqCst);
        self.counters.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let input = input_plan_value(&cx)?;
        let plan = serde_json::to_vec(&json!({
            "sum_by": {
                "input": input,
                "key": cx.settings["key"],
                "value": cx.settings["value"],
            }
        }))?;
        let schema = self.predict_schema(cx.settings, &cx.input_schemas())?;
        Ok(NodeResult::new(schema, plan))
    }
}

/// Heavy sink node: writes its input to a file
pub struct WriteBehavior {
    counters: Counters,
}

#[async_trait]
impl NodeBehavior for WriteBehavior {
    fn node_type(&self) -> &str {
        "write"
    }

    fn validate_settings(&self, settings: &Value) -> Result<()> {
        match settings.get("path") {
            Some(Value::String(_)) => Ok(()),
            _ => Err(FlowError::computation("expected output 'path'")),
        }
    }

    fn predict_schema(&self, _settings: &Value, inputs: &[TableSchema]) -> Result<TableSchema> {
        Ok(inputs.first().cloned().unwrap_or_default())
    }

    async fn execute(&self, cx: BehaviorContext<'_>) -> Result<NodeResult> {
        self.counters.behavior_calls.fetch_add(1, Ordering::SeqCst);
        let input = input_plan_value(&cx)?;
        let plan = serde_json::to_vec(&json!({
            "write": {"input": input, "path": cx.settings["path"]}
        }))?;
        let schema = self.predict_schema(cx.settings, &cx.input_schemas())?;
        Ok(NodeResult::new(schema, plan))
    }

    fn heavy_operation(&self) -> Option<OperationType> {
        Some(OperationType::WriteOutput)
    }
}

/// Always raises a computation error
pub struct FailingBehavior;

#[async_trait]
impl NodeBehavior for FailingBehavior {
    fn node_type(&self) -> &str {
        "boom"
    }

    fn validate_settings(&self, _settings: &Value) -> Result<()> {
        Ok(())
    }

    fn predict_schema(&self, _settings: &Value, inputs: &[TableSchema]) -> Result<TableSchema> {
        Ok(inputs.first().cloned().unwrap_or_default())
    }

    async fn execute(&self, _cx: BehaviorContext<'_>) -> Result<NodeResult> {
        Err(FlowError::computation("boom"))
    }
}

/// Cancels the run the first time it executes, then acts as a pass-through
pub struct CancelOnceBehavior {
    armed: AtomicBool,
}

impl CancelOnceBehavior {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl NodeBehavior for CancelOnceBehavior {
    fn node_type(&self) -> &str {
        "cancel_once"
    }

    fn validate_settings(&self, _settings: &Value) -> Result<()> {
        Ok(())
    }

    fn predict_schema(&self, _settings: &Value, inputs: &[TableSchema]) -> Result<TableSchema> {
        Ok(inputs.first().cloned().unwrap_or_default())
    }

    async fn execute(&self, cx: BehaviorContext<'_>) -> Result<NodeResult> {
        if self.armed.swap(false, Ordering::SeqCst) {
            cx.cancel.cancel();
            return Err(FlowError::Cancelled);
        }
        let input = cx.require_input(EdgeRole::Main)?;
        Ok(NodeResult::new(input.schema.clone(), input.plan.clone()))
    }
}

/// Registry with the standard test behaviors registered
pub fn test_registry(counters: &Counters) -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.register(Arc::new(SourceBehavior {
        counters: counters.clone(),
    }));
    registry.register(Arc::new(FilterBehavior {
        counters: counters.clone(),
    }));
    registry.register(Arc::new(AggregateBehavior {
        counters: counters.clone(),
    }));
    registry.register(Arc::new(WriteBehavior {
        counters: counters.clone(),
    }));
    registry.register(Arc::new(FailingBehavior));
    registry
}

// ── Evaluator ───────────────────────────────────────────────────────

/// Interprets the JSON plan trees built by the test behaviors
pub struct MockEvaluator {
    counters: Counters,
}

impl MockEvaluator {
    pub fn new(counters: &Counters) -> Self {
        Self {
            counters: counters.clone(),
        }
    }

    fn eval_rows(value: &Value) -> Result<Vec<Value>> {
        if let Some(rows) = value.get("rows").and_then(|r| r.as_array()) {
            return Ok(rows.clone());
        }
        if let Some(filter) = value.get("filter") {
            let rows = Self::eval_rows(&filter["input"])?;
            let column = filter["column"]
                .as_str()
                .ok_or_else(|| FlowError::computation("filter plan missing column"))?;
            let gt = filter["gt"]
                .as_f64()
                .ok_or_else(|| FlowError::computation("filter plan missing threshold"))?;
            return Ok(rows
                .into_iter()
                .filter(|row| row.get(column).and_then(|v| v.as_f64()).is_some_and(|v| v > gt))
                .collect());
        }
        if let Some(agg) = value.get("sum_by") {
            let rows = Self::eval_rows(&agg["input"])?;
            let key = agg["key"]
                .as_str()
                .ok_or_else(|| FlowError::computation("sum_by plan missing key"))?;
            let value_col = agg["value"]
                .as_str()
                .ok_or_else(|| FlowError::computation("sum_by plan missing value"))?;
            let mut groups: std::collections::BTreeMap<String, f64> = Default::default();
            for row in &rows {
                let group = row.get(key).and_then(|v| v.as_str()).unwrap_or_default();
                let amount = row.get(value_col).and_then(|v| v.as_f64()).unwrap_or(0.0);
                *groups.entry(group.to_string()).or_insert(0.0) += amount;
            }
            return Ok(groups
                .into_iter()
                .map(|(group, total)| json!({key: group, value_col: total}))
                .collect());
        }
        if let Some(write) = value.get("write") {
            return Self::eval_rows(&write["input"]);
        }
        Err(FlowError::computation("unrecognized plan shape"))
    }
}

#[async_trait]
impl PlanEvaluator for MockEvaluator {
    async fn evaluate(
        &self,
        op: OperationType,
        plan: &[u8],
        cache_dir: &Path,
    ) -> Result<EvalOutcome> {
        self.counters.evaluations.fetch_add(1, Ordering::SeqCst);
        let value = parse_plan(plan)?;
        let rows = Self::eval_rows(&value)?;
        match op {
            OperationType::CalculateSchema => Ok(EvalOutcome::Schema(schema_of(&rows))),
            OperationType::CalculateNumberOfRecords => Ok(EvalOutcome::Count(rows.len() as u64)),
            OperationType::StoreSample | OperationType::FuzzyMatch => {
                Ok(EvalOutcome::Table(serde_json::to_vec(&rows)?))
            }
            OperationType::Store => {
                let path = cache_dir.join(format!("store-{}.json", uuid::Uuid::new_v4()));
                std::fs::write(&path, serde_json::to_vec(&rows)?)?;
                Ok(EvalOutcome::Written(path.display().to_string()))
            }
            OperationType::WriteOutput => {
                let target = value
                    .get("write")
                    .and_then(|w| w.get("path"))
                    .and_then(|p| p.as_str())
                    .map(|p| cache_dir.join(p))
                    .unwrap_or_else(|| cache_dir.join("output.json"));
                std::fs::write(&target, serde_json::to_vec(&rows)?)?;
                Ok(EvalOutcome::Written(target.display().to_string()))
            }
        }
    }

    fn open_table(&self, data: &[u8]) -> Result<TableSummary> {
        let rows: Vec<Value> = serde_json::from_slice(data)
            .map_err(|e| FlowError::Integrity(format!("cannot open table: {}", e)))?;
        if rows.iter().any(|r| !r.is_object()) {
            return Err(FlowError::Integrity("table rows are not records".to_string()));
        }
        Ok(TableSummary {
            schema: schema_of(&rows),
            row_count: rows.len() as u64,
        })
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// In-memory dispatcher that records dispatched operations
pub struct RecordingDispatcher {
    evaluator: MockEvaluator,
    dispatched: Mutex<Vec<OperationType>>,
}

impl RecordingDispatcher {
    pub fn new(counters: &Counters) -> Self {
        Self {
            evaluator: MockEvaluator::new(counters),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    pub fn dispatched(&self) -> Vec<OperationType> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        op: OperationType,
        plan: &[u8],
        cache_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<DispatchOutcome> {
        self.dispatched.lock().unwrap().push(op);
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        let outcome = self.evaluator.evaluate(op, plan, cache_dir).await?;
        Ok(outcome.into())
    }
}
