//! Core types for the Flowgrid automation engine.
//!
//! This crate holds the shared vocabulary of the trigger and orchestration
//! crates: typed identifiers, the closed trigger-strategy and
//! execution-status enumerations, the dedupe cursor sum type, firing and
//! delivery envelopes, and engine configuration.

pub mod config;
pub mod events;
pub mod types;

pub use config::{DedupeConfig, EngineConfig, SchedulerConfig, WaitSettings};
pub use events::{TriggerFiring, WebhookDelivery};
pub use types::{
    DedupeCursor, Execution, ExecutionId, ExecutionStatus, TriggerId, TriggerStrategyKind,
    WorkflowId,
};
