//! Execution orchestration for Flowgrid
//!
//! This crate drives *what happens after* a trigger fires:
//! - The bounded-polling wait protocol over asynchronously running
//!   executions (`await_completion`)
//! - The batch loop orchestrator: N sequential child executions from a
//!   list, with per-item failure isolation
//! - The variable coercion boundary shared by batch items

pub mod batch;
pub mod execution;
pub mod variables;

pub use batch::{BatchItemError, BatchItemSuccess, BatchLoopConfig, BatchLoopOrchestrator, BatchResult};
pub use execution::{await_completion, ExecutionEngine, WaitConfig};
pub use variables::{
    coerce_value, InMemoryVariableStore, VariableDefinition, VariableStore, VariableType,
};

use flowgrid_core::{ExecutionId, ExecutionStatus, WorkflowId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Batch cannot target its own workflow: {0}")]
    SelfReference(WorkflowId),

    #[error("Invalid batch input: {0}")]
    InvalidInput(String),

    #[error("Cannot coerce value: {0}")]
    Coercion(String),

    #[error("Execution {execution_id} failed: {message}")]
    ExecutionFailed {
        execution_id: ExecutionId,
        message: String,
    },

    #[error("Execution {execution_id} entered {status}, which cannot be awaited")]
    UnsupportedState {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("Execution {execution_id} still running after {polls} polls")]
    WaitTimeout {
        execution_id: ExecutionId,
        polls: u32,
    },

    #[error("Execution engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
