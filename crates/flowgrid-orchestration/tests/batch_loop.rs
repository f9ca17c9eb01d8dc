//! Integration tests for the flowgrid-orchestration crate.

use async_trait::async_trait;
use flowgrid_core::{Execution, ExecutionId, ExecutionStatus, WorkflowId};
use flowgrid_orchestration::{
    await_completion, BatchLoopConfig, BatchLoopOrchestrator, ExecutionEngine,
    InMemoryVariableStore, OrchestrationError, Result, VariableDefinition, VariableStore,
    VariableType, WaitConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Engine that completes each execution only after a fixed number of
/// status polls, exercising the wait loop rather than finishing
/// instantly.
struct SlowEngine {
    polls_until_done: u32,
    remaining: Mutex<HashMap<ExecutionId, u32>>,
    inputs: Mutex<Vec<Value>>,
}

impl SlowEngine {
    fn new(polls_until_done: u32) -> Self {
        Self {
            polls_until_done,
            remaining: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExecutionEngine for SlowEngine {
    async fn start_execution(&self, _workflow_id: WorkflowId, input: Value) -> Result<ExecutionId> {
        let id = ExecutionId::new();
        self.remaining
            .lock()
            .unwrap()
            .insert(id, self.polls_until_done);
        self.inputs.lock().unwrap().push(input);
        Ok(id)
    }

    async fn execution_status(&self, id: ExecutionId) -> Result<Execution> {
        let mut remaining = self.remaining.lock().unwrap();
        let left = remaining
            .get_mut(&id)
            .ok_or(OrchestrationError::ExecutionNotFound(id))?;

        if *left > 0 {
            *left -= 1;
            Ok(Execution::new(id, ExecutionStatus::Running))
        } else {
            Ok(Execution::new(id, ExecutionStatus::Success).with_output(json!({ "done": true })))
        }
    }
}

fn wait_config(max_polls: u32) -> WaitConfig {
    WaitConfig::new(max_polls, Duration::from_millis(1))
}

#[tokio::test]
async fn test_await_completion_spans_multiple_polls() {
    let engine = SlowEngine::new(3);
    let id = engine.start_execution(WorkflowId::new(), json!({})).await.unwrap();

    let output = await_completion(&engine, id, &wait_config(10)).await.unwrap();
    assert_eq!(output, json!({ "done": true }));
}

#[tokio::test]
async fn test_await_completion_times_out_on_slow_execution() {
    let engine = SlowEngine::new(10);
    let id = engine.start_execution(WorkflowId::new(), json!({})).await.unwrap();

    let err = await_completion(&engine, id, &wait_config(3)).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::WaitTimeout { .. }));
}

#[tokio::test]
async fn test_batch_runs_sequentially_over_slow_children() {
    let engine = Arc::new(SlowEngine::new(2));
    let store = Arc::new(InMemoryVariableStore::new());
    store
        .declare(VariableDefinition::new("current_item", VariableType::Text))
        .await;

    let orchestrator = BatchLoopOrchestrator::new(engine.clone(), store.clone());
    let config = BatchLoopConfig::new(WorkflowId::new(), WorkflowId::new(), "current_item")
        .with_wait(wait_config(10));

    let result = orchestrator
        .run_batch(&json!(["alpha", "beta", "gamma"]), &config)
        .await
        .unwrap();

    assert_eq!(result.total_items, 3);
    assert_eq!(result.successful_executions, 3);
    assert_eq!(result.failed_executions, 0);

    // Children were started in input order, one at a time.
    let inputs = engine.inputs.lock().unwrap().clone();
    let items: Vec<&Value> = inputs.iter().map(|input| &input["item"]).collect();
    assert_eq!(items, vec![&json!("alpha"), &json!("beta"), &json!("gamma")]);

    // The shared variable holds the final item once the batch is done.
    assert_eq!(
        store.get_value("current_item").await.unwrap(),
        Some(json!("gamma"))
    );
}

#[tokio::test]
async fn test_batch_result_counts_match_mixed_outcomes() {
    let engine = Arc::new(SlowEngine::new(0));
    let store = Arc::new(InMemoryVariableStore::new());
    store
        .declare(VariableDefinition::new("current_item", VariableType::Number))
        .await;

    let orchestrator = BatchLoopOrchestrator::new(engine, store);
    let config = BatchLoopConfig::new(WorkflowId::new(), WorkflowId::new(), "current_item")
        .with_wait(wait_config(5));

    // The middle item cannot be coerced to a number.
    let result = orchestrator
        .run_batch(&json!([10, { "nested": true }, 30]), &config)
        .await
        .unwrap();

    assert_eq!(result.total_items, 3);
    assert_eq!(result.successful_executions, 2);
    assert_eq!(result.failed_executions, 1);
    assert_eq!(result.errors[0].index, 1);
    assert_eq!(
        result.results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 2]
    );
}
