//! Execution wait protocol
//!
//! The execution engine runs fired executions asynchronously; this
//! module is the synchronous long-poll wrapper callers use to wait on
//! one. Its only liveness guarantee is bounded wall-clock wait time
//! (`max_polls * interval`), not bounded child-execution time.

use crate::{OrchestrationError, Result};
use async_trait::async_trait;
use flowgrid_core::{Execution, ExecutionId, ExecutionStatus, WaitSettings, WorkflowId};
use std::time::Duration;
use tracing::{debug, warn};

/// Execution engine boundary.
///
/// The engine owns all status transitions; this crate only starts
/// executions and observes them.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start a new execution of a workflow.
    async fn start_execution(
        &self,
        workflow_id: WorkflowId,
        input: serde_json::Value,
    ) -> Result<ExecutionId>;

    /// Current status snapshot of an execution.
    async fn execution_status(&self, id: ExecutionId) -> Result<Execution>;
}

/// Bounds for one await-completion wait.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Maximum number of status polls before timing out
    pub max_polls: u32,
    /// Sleep between polls
    pub interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_polls: 60,
            interval: Duration::from_secs(1),
        }
    }
}

impl WaitConfig {
    pub fn new(max_polls: u32, interval: Duration) -> Self {
        Self {
            max_polls,
            interval,
        }
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl From<&WaitSettings> for WaitConfig {
    fn from(settings: &WaitSettings) -> Self {
        Self {
            max_polls: settings.max_polls,
            interval: settings.interval(),
        }
    }
}

/// Wait for an execution to reach a terminal state.
///
/// Polls the engine every `interval`:
/// - `SUCCESS` returns the execution's output;
/// - `FAILED` errors with the execution's status message;
/// - `NEEDS_INPUT` or a `SCHEDULED` (delay/wait-resume) state errors
///   immediately rather than blocking an unbounded amount of time;
/// - `RUNNING` keeps polling until `max_polls` is exhausted, then errors
///   with a timeout.
pub async fn await_completion(
    engine: &dyn ExecutionEngine,
    execution_id: ExecutionId,
    config: &WaitConfig,
) -> Result<serde_json::Value> {
    for poll in 1..=config.max_polls {
        let execution = engine.execution_status(execution_id).await?;

        debug!(
            execution_id = %execution_id,
            status = %execution.status,
            poll,
            "Polled execution status"
        );

        match execution.status {
            ExecutionStatus::Success => {
                return Ok(execution.output.unwrap_or(serde_json::Value::Null));
            }
            ExecutionStatus::Failed => {
                return Err(OrchestrationError::ExecutionFailed {
                    execution_id,
                    message: execution
                        .status_message
                        .unwrap_or_else(|| "execution failed".to_string()),
                });
            }
            ExecutionStatus::NeedsInput | ExecutionStatus::Scheduled => {
                return Err(OrchestrationError::UnsupportedState {
                    execution_id,
                    status: execution.status,
                });
            }
            ExecutionStatus::Running => {
                if poll < config.max_polls {
                    tokio::time::sleep(config.interval).await;
                }
            }
        }
    }

    warn!(
        execution_id = %execution_id,
        max_polls = config.max_polls,
        "Execution wait timed out"
    );

    Err(OrchestrationError::WaitTimeout {
        execution_id,
        polls: config.max_polls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Engine stub that replays a scripted status sequence, holding the
    /// final entry once the script runs out.
    struct ScriptedEngine {
        script: Mutex<Vec<Execution>>,
        polls: AtomicU32,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Execution>) -> Self {
            Self {
                script: Mutex::new(script),
                polls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ExecutionEngine for ScriptedEngine {
        async fn start_execution(
            &self,
            _workflow_id: WorkflowId,
            _input: serde_json::Value,
        ) -> Result<ExecutionId> {
            Ok(ExecutionId::new())
        }

        async fn execution_status(&self, _id: ExecutionId) -> Result<Execution> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                Ok(script[0].clone())
            }
        }
    }

    fn fast_config(max_polls: u32) -> WaitConfig {
        WaitConfig::new(max_polls, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_returns_output_on_success() {
        let id = ExecutionId::new();
        let engine = ScriptedEngine::new(vec![
            Execution::new(id, ExecutionStatus::Running),
            Execution::new(id, ExecutionStatus::Success).with_output(json!({"rows": 3})),
        ]);

        let output = await_completion(&engine, id, &fast_config(10)).await.unwrap();
        assert_eq!(output, json!({"rows": 3}));
        assert_eq!(engine.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_surfaces_status_message() {
        let id = ExecutionId::new();
        let engine = ScriptedEngine::new(vec![
            Execution::new(id, ExecutionStatus::Failed).with_message("provider quota exceeded"),
        ]);

        let err = await_completion(&engine, id, &fast_config(10))
            .await
            .unwrap_err();
        match err {
            OrchestrationError::ExecutionFailed { message, .. } => {
                assert_eq!(message, "provider quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_needs_input_errors_immediately() {
        let id = ExecutionId::new();
        let engine = ScriptedEngine::new(vec![
            Execution::new(id, ExecutionStatus::NeedsInput),
            Execution::new(id, ExecutionStatus::Success),
        ]);

        let err = await_completion(&engine, id, &fast_config(10))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::UnsupportedState { .. }));
        // Only one poll: the wait does not keep watching a paused child.
        assert_eq!(engine.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delay_rescheduled_state_errors_immediately() {
        let id = ExecutionId::new();
        let engine = ScriptedEngine::new(vec![
            Execution::new(id, ExecutionStatus::Running),
            Execution::new(id, ExecutionStatus::Scheduled),
        ]);

        let err = await_completion(&engine, id, &fast_config(10))
            .await
            .unwrap_err();
        match err {
            OrchestrationError::UnsupportedState { status, .. } => {
                assert_eq!(status, ExecutionStatus::Scheduled);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_after_max_polls() {
        let id = ExecutionId::new();
        let engine = ScriptedEngine::new(vec![Execution::new(id, ExecutionStatus::Running)]);

        let err = await_completion(&engine, id, &fast_config(3))
            .await
            .unwrap_err();
        match err {
            OrchestrationError::WaitTimeout { polls, .. } => assert_eq!(polls, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_on_final_poll_still_returns() {
        let id = ExecutionId::new();
        let engine = ScriptedEngine::new(vec![
            Execution::new(id, ExecutionStatus::Running),
            Execution::new(id, ExecutionStatus::Running),
            Execution::new(id, ExecutionStatus::Success),
        ]);

        let output = await_completion(&engine, id, &fast_config(3)).await.unwrap();
        assert_eq!(output, serde_json::Value::Null);
    }

    #[test]
    fn test_wait_config_from_settings() {
        let settings = WaitSettings::default().with_max_polls(5).with_interval(2);
        let config = WaitConfig::from(&settings);
        assert_eq!(config.max_polls, 5);
        assert_eq!(config.interval, Duration::from_secs(2));
    }
}
