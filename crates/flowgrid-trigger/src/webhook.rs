//! Webhook trigger matching
//!
//! Webhook kinds are purely reactive: an inbound delivery supplies the
//! payload directly, and the engine's only job is verifying the delivery
//! matches what the trigger instance expects. No polling, no cursor.

use crate::instance::TriggerInstance;
use crate::{Result, TriggerError};
use flowgrid_core::{TriggerStrategyKind, WebhookDelivery};
use regex::Regex;

/// Verifies inbound deliveries against a trigger instance's expected
/// event type.
pub struct WebhookMatcher;

impl WebhookMatcher {
    /// Whether the delivery should fire this instance.
    ///
    /// App webhooks match the expected event type exactly; custom
    /// webhooks treat it as a regex over the delivered event type. An
    /// instance with no expected event type is a configuration error.
    pub fn matches(instance: &TriggerInstance, delivery: &WebhookDelivery) -> Result<bool> {
        let expected = instance.expected_event.as_deref().ok_or_else(|| {
            TriggerError::InvalidConfiguration(format!(
                "webhook trigger {} has no expected event type",
                instance.id
            ))
        })?;

        match instance.kind {
            TriggerStrategyKind::AppWebhook => Ok(delivery.event_type == expected),
            TriggerStrategyKind::CustomWebhook => {
                let pattern = Regex::new(expected).map_err(|e| {
                    TriggerError::InvalidConfiguration(format!(
                        "invalid event pattern {expected:?}: {e}"
                    ))
                })?;
                Ok(pattern.is_match(&delivery.event_type))
            }
            other => Err(TriggerError::InvalidConfiguration(format!(
                "{other} trigger cannot receive webhook deliveries"
            ))),
        }
    }
}
