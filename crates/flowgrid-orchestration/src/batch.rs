//! Batch loop orchestration
//!
//! One action fires many child executions sequentially: for each element
//! of an input list, coerce it to the shared variable's declared type,
//! persist it, start a child execution, and wait for its outcome. A
//! failing item is recorded and the loop continues; only configuration
//! and input-shape problems abort the whole batch.
//!
//! The loop is strictly sequential: item *i + 1* never starts before
//! item *i*'s wait resolves. That bounds resource usage to one in-flight
//! child execution at the cost of throughput.

use crate::execution::{await_completion, ExecutionEngine, WaitConfig};
use crate::variables::{coerce_value, VariableStore};
use crate::{OrchestrationError, Result};
use flowgrid_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key under which a wrapped input object may carry its list.
const ITEMS_KEY: &str = "items";

/// Configuration of one batch run.
#[derive(Debug, Clone)]
pub struct BatchLoopConfig {
    /// Workflow the batch action itself runs in
    pub invoking_workflow_id: WorkflowId,
    /// Workflow to execute once per item
    pub child_workflow_id: WorkflowId,
    /// Shared variable receiving each item's coerced value
    pub variable_id: String,
    /// Wait bounds applied to every child execution
    pub wait: WaitConfig,
}

impl BatchLoopConfig {
    pub fn new(
        invoking_workflow_id: WorkflowId,
        child_workflow_id: WorkflowId,
        variable_id: impl Into<String>,
    ) -> Self {
        Self {
            invoking_workflow_id,
            child_workflow_id,
            variable_id: variable_id.into(),
            wait: WaitConfig::default(),
        }
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }
}

/// A completed item: which execution ran and what it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemSuccess {
    pub index: usize,
    pub execution_id: ExecutionId,
    pub output: Value,
}

/// A failed item and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch run. Failures are additive information alongside
/// successes, never an all-or-nothing exception; both lists preserve
/// input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub total_items: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub results: Vec<BatchItemSuccess>,
    pub errors: Vec<BatchItemError>,
}

/// Drives N sequential child executions from an input list.
pub struct BatchLoopOrchestrator {
    engine: Arc<dyn ExecutionEngine>,
    variables: Arc<dyn VariableStore>,
}

impl BatchLoopOrchestrator {
    pub fn new(engine: Arc<dyn ExecutionEngine>, variables: Arc<dyn VariableStore>) -> Self {
        Self { engine, variables }
    }

    /// Run the batch.
    ///
    /// Fails fast, before any child execution starts, on: a child
    /// workflow equal to the invoking workflow, an input that is neither
    /// a list nor an object wrapping one, or an unknown shared variable.
    pub async fn run_batch(&self, input: &Value, config: &BatchLoopConfig) -> Result<BatchResult> {
        if config.child_workflow_id == config.invoking_workflow_id {
            return Err(OrchestrationError::SelfReference(config.child_workflow_id));
        }

        let items = normalize_items(input)?;

        let data_type = self
            .variables
            .variable_type(&config.variable_id)
            .await?
            .ok_or_else(|| OrchestrationError::VariableNotFound(config.variable_id.clone()))?;

        info!(
            child_workflow_id = %config.child_workflow_id,
            variable_id = %config.variable_id,
            total_items = items.len(),
            "Starting batch loop"
        );

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for (index, raw) in items.iter().enumerate() {
            match self.run_item(index, raw, data_type, config).await {
                Ok(success) => {
                    debug!(
                        index,
                        execution_id = %success.execution_id,
                        "Batch item succeeded"
                    );
                    results.push(success);
                }
                Err(e) => {
                    warn!(index, error = %e, "Batch item failed");
                    errors.push(BatchItemError {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }

        let result = BatchResult {
            total_items: items.len(),
            successful_executions: results.len(),
            failed_executions: errors.len(),
            results,
            errors,
        };

        info!(
            total = result.total_items,
            succeeded = result.successful_executions,
            failed = result.failed_executions,
            "Batch loop finished"
        );

        Ok(result)
    }

    /// One item's pipeline. The variable write happens-before the child
    /// execution starts; any error here is recorded against the item.
    async fn run_item(
        &self,
        index: usize,
        raw: &Value,
        data_type: crate::variables::VariableType,
        config: &BatchLoopConfig,
    ) -> Result<BatchItemSuccess> {
        let coerced = coerce_value(raw, data_type)?;

        self.variables
            .set_value(&config.variable_id, coerced.clone())
            .await?;

        let execution_id = self
            .engine
            .start_execution(
                config.child_workflow_id,
                serde_json::json!({ "item": coerced, "index": index }),
            )
            .await?;

        let output = await_completion(self.engine.as_ref(), execution_id, &config.wait).await?;

        Ok(BatchItemSuccess {
            index,
            execution_id,
            output,
        })
    }
}

/// Accept a raw list, or an object wrapping a list under `items`.
/// Anything else is a configuration error, not a per-item error.
fn normalize_items(input: &Value) -> Result<Vec<Value>> {
    match input {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => match map.get(ITEMS_KEY) {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(OrchestrationError::InvalidInput(format!(
                "object input must carry a list under {ITEMS_KEY:?}"
            ))),
        },
        other => Err(OrchestrationError::InvalidInput(format!(
            "expected a list or an object wrapping one, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{InMemoryVariableStore, VariableDefinition, VariableType};
    use async_trait::async_trait;
    use flowgrid_core::{Execution, ExecutionStatus};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Engine stub: every started execution succeeds immediately,
    /// echoing its input, unless the input item matches `fail_on`.
    struct EchoEngine {
        executions: Mutex<HashMap<ExecutionId, Execution>>,
        started: Mutex<Vec<Value>>,
        fail_on: Option<Value>,
    }

    impl EchoEngine {
        fn new() -> Self {
            Self {
                executions: Mutex::new(HashMap::new()),
                started: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(item: Value) -> Self {
            Self {
                fail_on: Some(item),
                ..Self::new()
            }
        }

        fn started_count(&self) -> usize {
            self.started.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExecutionEngine for EchoEngine {
        async fn start_execution(
            &self,
            _workflow_id: WorkflowId,
            input: Value,
        ) -> Result<ExecutionId> {
            let id = ExecutionId::new();
            let item = input.get("item").cloned().unwrap_or(Value::Null);
            self.started.lock().unwrap().push(item.clone());

            let execution = if self.fail_on.as_ref() == Some(&item) {
                Execution::new(id, ExecutionStatus::Failed).with_message("step crashed")
            } else {
                Execution::new(id, ExecutionStatus::Success).with_output(json!({ "echo": item }))
            };
            self.executions.lock().unwrap().insert(id, execution);
            Ok(id)
        }

        async fn execution_status(&self, id: ExecutionId) -> Result<Execution> {
            self.executions
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(OrchestrationError::ExecutionNotFound(id))
        }
    }

    async fn store_with(id: &str, data_type: VariableType) -> Arc<InMemoryVariableStore> {
        let store = Arc::new(InMemoryVariableStore::new());
        store.declare(VariableDefinition::new(id, data_type)).await;
        store
    }

    fn config() -> BatchLoopConfig {
        BatchLoopConfig::new(WorkflowId::new(), WorkflowId::new(), "current_item")
            .with_wait(WaitConfig::new(5, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_all_items_succeed_in_order() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Number).await;
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        let result = orchestrator
            .run_batch(&json!([1, 2, 3]), &config())
            .await
            .unwrap();

        assert_eq!(result.total_items, 3);
        assert_eq!(result.successful_executions, 3);
        assert_eq!(result.failed_executions, 0);
        let indices: Vec<usize> = result.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(result.results[1].output, json!({ "echo": 2 }));
    }

    #[tokio::test]
    async fn test_coercion_failure_does_not_block_later_items() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Number).await;
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        let result = orchestrator
            .run_batch(&json!([1, "not a number", 3]), &config())
            .await
            .unwrap();

        assert_eq!(result.total_items, 3);
        assert_eq!(result.successful_executions, 2);
        assert_eq!(result.failed_executions, 1);
        assert_eq!(result.errors[0].index, 1);
        // Items 1 and 3 both reached the engine.
        assert_eq!(engine.started_count(), 2);
    }

    #[tokio::test]
    async fn test_child_failure_recorded_and_loop_continues() {
        let engine = Arc::new(EchoEngine::failing_on(json!(2.0)));
        let store = store_with("current_item", VariableType::Number).await;
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        let result = orchestrator
            .run_batch(&json!([1.0, 2.0, 3.0]), &config())
            .await
            .unwrap();

        assert_eq!(result.successful_executions, 2);
        assert_eq!(result.failed_executions, 1);
        assert_eq!(result.errors[0].index, 1);
        assert!(result.errors[0].message.contains("step crashed"));
        assert_eq!(engine.started_count(), 3);
    }

    #[tokio::test]
    async fn test_self_reference_rejected_before_any_execution() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Json).await;
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        let workflow = WorkflowId::new();
        let config = BatchLoopConfig::new(workflow, workflow, "current_item");

        let result = orchestrator.run_batch(&json!([1]), &config).await;
        assert!(matches!(result, Err(OrchestrationError::SelfReference(_))));
        assert_eq!(engine.started_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_input_is_successful_noop() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Json).await;
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        let result = orchestrator.run_batch(&json!([]), &config()).await.unwrap();
        assert_eq!(result.total_items, 0);
        assert_eq!(engine.started_count(), 0);
    }

    #[tokio::test]
    async fn test_wrapped_input_accepted() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Text).await;
        let orchestrator = BatchLoopOrchestrator::new(engine, store);

        let result = orchestrator
            .run_batch(&json!({ "items": ["a", "b"] }), &config())
            .await
            .unwrap();
        assert_eq!(result.total_items, 2);
    }

    #[tokio::test]
    async fn test_invalid_input_shape_is_fatal() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Json).await;
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        for bad in [json!("scalar"), json!(5), json!({ "rows": [1] })] {
            let result = orchestrator.run_batch(&bad, &config()).await;
            assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
        }
        assert_eq!(engine.started_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_variable_is_fatal() {
        let engine = Arc::new(EchoEngine::new());
        let store = Arc::new(InMemoryVariableStore::new());
        let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store);

        let result = orchestrator.run_batch(&json!([1]), &config()).await;
        assert!(matches!(
            result,
            Err(OrchestrationError::VariableNotFound(_))
        ));
        assert_eq!(engine.started_count(), 0);
    }

    #[tokio::test]
    async fn test_variable_receives_each_item_before_child_starts() {
        let engine = Arc::new(EchoEngine::new());
        let store = store_with("current_item", VariableType::Number).await;
        let orchestrator = BatchLoopOrchestrator::new(engine, store.clone());

        orchestrator
            .run_batch(&json!([7, 8]), &config())
            .await
            .unwrap();

        // After the batch, the variable holds the last item's value.
        assert_eq!(store.get_value("current_item").await.unwrap(), Some(json!(8)));
    }
}
