//! Trigger instances
//!
//! A [`TriggerInstance`] is the persisted, per-workflow configuration of
//! one trigger: which catalog definition it uses, its connection and
//! provider settings, its schedule, and whether it is enabled.

use crate::recurrence::{next_fire_time, RecurrenceSpec};
use crate::{Result, TriggerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgrid_core::{TriggerId, TriggerStrategyKind, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persisted per-workflow trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInstance {
    /// Instance ID
    pub id: TriggerId,
    /// Catalog key of the definition this instance uses
    pub definition_key: String,
    /// Workflow fired by this trigger
    pub workflow_id: WorkflowId,
    /// Strategy kind, denormalized from the definition
    pub kind: TriggerStrategyKind,
    /// Whether the scheduler evaluates this instance
    pub enabled: bool,
    /// Opaque connection reference passed to the provider fetch
    pub connection: serde_json::Value,
    /// Opaque provider configuration passed to the provider fetch
    pub provider_config: serde_json::Value,
    /// Recurrence spec (schedule kind only)
    pub schedule: Option<RecurrenceSpec>,
    /// Instant the schedule is anchored at
    pub schedule_start: DateTime<Utc>,
    /// Next computed fire time (schedule kind only)
    pub next_fire_at: Option<DateTime<Utc>>,
    /// Expected event type for webhook kinds; exact match for app
    /// webhooks, regex pattern allowed for custom webhooks
    pub expected_event: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl TriggerInstance {
    pub fn new(
        definition_key: impl Into<String>,
        workflow_id: WorkflowId,
        kind: TriggerStrategyKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TriggerId::new(),
            definition_key: definition_key.into(),
            workflow_id,
            kind,
            enabled: true,
            connection: serde_json::Value::Null,
            provider_config: serde_json::Value::Null,
            schedule: None,
            schedule_start: now,
            next_fire_at: None,
            expected_event: None,
            created_at: now,
        }
    }

    pub fn with_connection(mut self, connection: serde_json::Value) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_provider_config(mut self, config: serde_json::Value) -> Self {
        self.provider_config = config;
        self
    }

    pub fn with_schedule(mut self, schedule: RecurrenceSpec) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_schedule_start(mut self, start: DateTime<Utc>) -> Self {
        self.schedule_start = start;
        self
    }

    pub fn with_expected_event(mut self, event_type: impl Into<String>) -> Self {
        self.expected_event = Some(event_type.into());
        self
    }

    /// Recompute the next fire time from the schedule spec. A
    /// configuration error on a schedule-kind instance with no spec.
    pub fn update_next_fire(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.kind != TriggerStrategyKind::Schedule {
            return Ok(());
        }
        let spec = self.schedule.as_ref().ok_or_else(|| {
            TriggerError::InvalidConfiguration(format!(
                "schedule trigger {} has no recurrence spec",
                self.id
            ))
        })?;
        self.next_fire_at = Some(next_fire_time(self.schedule_start, spec, now)?);
        Ok(())
    }
}

/// Persistence boundary for trigger instances.
#[async_trait]
pub trait TriggerInstanceRepository: Send + Sync {
    async fn save(&self, instance: &TriggerInstance) -> Result<()>;
    async fn get(&self, id: TriggerId) -> Result<Option<TriggerInstance>>;
    async fn list(&self) -> Result<Vec<TriggerInstance>>;
    async fn list_enabled(&self) -> Result<Vec<TriggerInstance>>;
    async fn delete(&self, id: TriggerId) -> Result<()>;
    async fn update(&self, instance: &TriggerInstance) -> Result<()>;
}

/// In-memory trigger instance repository
pub struct InMemoryTriggerInstanceRepository {
    instances: RwLock<HashMap<TriggerId, TriggerInstance>>,
}

impl InMemoryTriggerInstanceRepository {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTriggerInstanceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerInstanceRepository for InMemoryTriggerInstanceRepository {
    async fn save(&self, instance: &TriggerInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get(&self, id: TriggerId) -> Result<Option<TriggerInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<TriggerInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.values().cloned().collect())
    }

    async fn list_enabled(&self) -> Result<Vec<TriggerInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.values().filter(|i| i.enabled).cloned().collect())
    }

    async fn delete(&self, id: TriggerId) -> Result<()> {
        let mut instances = self.instances.write().await;
        instances.remove(&id);
        Ok(())
    }

    async fn update(&self, instance: &TriggerInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            instances.insert(instance.id, instance.clone());
            Ok(())
        } else {
            Err(TriggerError::NotFound(instance.id.to_string()))
        }
    }
}
