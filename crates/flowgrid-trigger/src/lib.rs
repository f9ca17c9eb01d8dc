//! Trigger dispatch and deduplication engine for Flowgrid
//!
//! This crate decides *when* a workflow fires:
//! - Recurrence computation from RFC 5545 rules or structured specs
//! - Three poll-deduplication strategies (time, item, length based)
//! - A closed polymorphic dispatcher over all trigger strategy kinds
//! - Webhook delivery matching for reactive triggers
//! - The scheduler tick service that drives enabled trigger instances

pub mod dedupe;
pub mod definition;
pub mod dispatcher;
pub mod instance;
pub mod recurrence;
pub mod scheduler;
pub mod webhook;

pub use dedupe::{
    dedupe_item_based, dedupe_length_based, dedupe_time_based, CursorStore, DedupeOutcome,
    InMemoryCursorStore,
};
pub use definition::{
    IdentityExtractor, PayloadExtractor, ProviderClient, TimestampExtractor, TriggerCatalog,
    TriggerDefinition,
};
pub use dispatcher::{TriggerDispatcher, TriggerEvaluation};
pub use instance::{InMemoryTriggerInstanceRepository, TriggerInstance, TriggerInstanceRepository};
pub use recurrence::{next_fire_time, RecurrencePeriod, RecurrenceRule, RecurrenceSpec};
pub use scheduler::TriggerScheduler;
pub use webhook::WebhookMatcher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Trigger not found: {0}")]
    NotFound(String),

    #[error("Invalid trigger configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid recurrence spec: {0}")]
    InvalidRecurrence(String),

    #[error("Provider fetch failed: {0}")]
    Provider(String),

    #[error("Firing channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TriggerError>;
