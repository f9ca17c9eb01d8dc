//! Firing and delivery envelopes exchanged between the trigger engine and
//! its host.

use crate::types::{TriggerId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One instance of a trigger deciding new work exists.
///
/// This is the outward contract consumed by the host's worker pool: every
/// firing carries exactly one payload item, so a poll that surfaces three
/// new items produces three firings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerFiring {
    /// Unique firing identifier
    pub id: Uuid,
    /// Trigger instance that fired
    pub trigger_id: TriggerId,
    /// Workflow to execute
    pub workflow_id: WorkflowId,
    /// When the firing was produced
    pub fired_at: DateTime<Utc>,
    /// Payload for the workflow run; shape is opaque per integration
    pub payload: serde_json::Value,
    /// Firing metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TriggerFiring {
    pub fn new(
        trigger_id: TriggerId,
        workflow_id: WorkflowId,
        fired_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            workflow_id,
            fired_at,
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A normalized inbound webhook call, before trigger matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Event type reported by the sender (e.g. "issue.created")
    pub event_type: String,
    /// Raw delivery payload
    pub payload: serde_json::Value,
    /// When the delivery arrived
    pub received_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firing_creation() {
        let firing = TriggerFiring::new(
            TriggerId::new(),
            WorkflowId::new(),
            Utc::now(),
            serde_json::json!({"key": "value"}),
        )
        .with_metadata("source", "poll");

        assert!(!firing.id.is_nil());
        assert_eq!(firing.metadata.get("source"), Some(&"poll".to_string()));
    }

    #[test]
    fn test_delivery_creation() {
        let delivery = WebhookDelivery::new("issue.created", serde_json::json!({}), Utc::now());
        assert_eq!(delivery.event_type, "issue.created");
    }
}
