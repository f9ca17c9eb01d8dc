//! Trigger definitions
//!
//! A [`TriggerDefinition`] is the immutable, per-integration description
//! of how a trigger detects work: its strategy kind, the payload each raw
//! item becomes, and the extraction functions the dedupe strategies need.
//! Definitions are catalog data; they are never mutated at runtime.

use crate::{Result, TriggerError};
use async_trait::async_trait;
use dashmap::DashMap;
use flowgrid_core::TriggerStrategyKind;
use serde_json::Value;
use std::sync::Arc;

/// Extracts the firing payload from one raw provider item.
pub type PayloadExtractor = fn(&Value) -> Value;

/// Extracts an item's timestamp in epoch milliseconds (time-based dedupe).
pub type TimestampExtractor = fn(&Value) -> Option<i64>;

/// Extracts an item's stable identifier (item-based dedupe).
pub type IdentityExtractor = fn(&Value) -> Option<String>;

/// Provider listing boundary for poll-based triggers, supplied by each
/// integration. Connection and config are passed explicitly so the poll
/// path stays testable without a live environment.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn fetch_items(&self, connection: &Value, config: &Value) -> Result<Vec<Value>>;
}

/// Immutable per-integration trigger description.
#[derive(Clone)]
pub struct TriggerDefinition {
    /// Strategy kind this definition implements
    pub kind: TriggerStrategyKind,
    /// Maps a raw item to the firing payload; identity by default
    pub payload: PayloadExtractor,
    /// Required for the time-based poll kind
    pub timestamp: Option<TimestampExtractor>,
    /// Required for the item-based poll kind
    pub identity: Option<IdentityExtractor>,
    /// Required for poll kinds
    pub provider: Option<Arc<dyn ProviderClient>>,
}

impl TriggerDefinition {
    pub fn new(kind: TriggerStrategyKind) -> Self {
        Self {
            kind,
            payload: identity_payload,
            timestamp: None,
            identity: None,
            provider: None,
        }
    }

    pub fn with_payload(mut self, payload: PayloadExtractor) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timestamp(mut self, timestamp: TimestampExtractor) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_identity(mut self, identity: IdentityExtractor) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ProviderClient>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Check that the definition carries everything its kind requires.
    /// Configuration errors fail fast, before any fetch occurs.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_poll() && self.provider.is_none() {
            return Err(TriggerError::InvalidConfiguration(format!(
                "{} definition has no provider client",
                self.kind
            )));
        }
        if self.kind == TriggerStrategyKind::PollTimeBased && self.timestamp.is_none() {
            return Err(TriggerError::InvalidConfiguration(
                "time-based poll definition has no timestamp extractor".to_string(),
            ));
        }
        if self.kind == TriggerStrategyKind::PollItemBased && self.identity.is_none() {
            return Err(TriggerError::InvalidConfiguration(
                "item-based poll definition has no identity extractor".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TriggerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDefinition")
            .field("kind", &self.kind)
            .field("has_timestamp", &self.timestamp.is_some())
            .field("has_identity", &self.identity.is_some())
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

fn identity_payload(item: &Value) -> Value {
    item.clone()
}

/// Registry of trigger definitions keyed by integration trigger name
/// (e.g. `"github.new_issue"`).
pub struct TriggerCatalog {
    definitions: DashMap<String, Arc<TriggerDefinition>>,
}

impl TriggerCatalog {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
        }
    }

    /// Register a definition under its catalog key. Validates eagerly so
    /// a broken definition is caught at registration, not at first poll.
    pub fn register(&self, key: impl Into<String>, definition: TriggerDefinition) -> Result<()> {
        definition.validate()?;
        self.definitions.insert(key.into(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<TriggerDefinition>> {
        self.definitions.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for TriggerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyProvider;

    #[async_trait]
    impl ProviderClient for EmptyProvider {
        async fn fetch_items(&self, _connection: &Value, _config: &Value) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_poll_definition_requires_provider() {
        let definition = TriggerDefinition::new(TriggerStrategyKind::PollLengthBased);
        assert!(definition.validate().is_err());

        let definition = definition.with_provider(Arc::new(EmptyProvider));
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_time_based_requires_timestamp_extractor() {
        let definition = TriggerDefinition::new(TriggerStrategyKind::PollTimeBased)
            .with_provider(Arc::new(EmptyProvider));
        assert!(definition.validate().is_err());

        let definition = definition.with_timestamp(|item| item.get("ts").and_then(Value::as_i64));
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_manual_definition_needs_nothing() {
        assert!(TriggerDefinition::new(TriggerStrategyKind::Manual)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_catalog_registration() {
        let catalog = TriggerCatalog::new();
        catalog
            .register(
                "github.new_issue",
                TriggerDefinition::new(TriggerStrategyKind::AppWebhook),
            )
            .unwrap();

        assert!(catalog.contains("github.new_issue"));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_catalog_rejects_invalid_definition() {
        let catalog = TriggerCatalog::new();
        let result = catalog.register(
            "broken.poll",
            TriggerDefinition::new(TriggerStrategyKind::PollItemBased),
        );
        assert!(result.is_err());
        assert!(catalog.is_empty());
    }
}
