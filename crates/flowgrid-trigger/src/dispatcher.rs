//! Trigger strategy dispatch
//!
//! Normalizes the seven structurally different trigger kinds into one
//! "does this fire now, and with what payload" contract. The set of
//! kinds is closed and rarely changes, so dispatch is a match over the
//! kind enum rather than an open plugin registry.
//!
//! The dispatcher performs no cursor or schedule persistence itself: the
//! stored cursor is passed in and the updated cursor handed back, so the
//! caller can commit it only after the emitted firings have been handed
//! off (at-least-once delivery), and so the dedupe path stays
//! unit-testable without stores.

use crate::dedupe::{dedupe_item_based, dedupe_length_based, dedupe_time_based, DedupeOutcome};
use crate::definition::TriggerDefinition;
use crate::instance::TriggerInstance;
use crate::recurrence::next_fire_time;
use crate::webhook::WebhookMatcher;
use crate::{Result, TriggerError};
use chrono::{DateTime, Duration, Utc};
use flowgrid_core::{DedupeCursor, TriggerFiring, TriggerStrategyKind, WebhookDelivery};
use tracing::{debug, info};

/// Outcome of evaluating one trigger instance.
///
/// `cursor` and `next_fire_at`, when set, must be persisted by the
/// caller strictly after the firings have been handed off.
#[derive(Debug)]
pub struct TriggerEvaluation {
    /// One firing per new item, in provider response order
    pub firings: Vec<TriggerFiring>,
    /// Updated dedupe cursor (poll kinds only)
    pub cursor: Option<DedupeCursor>,
    /// Recomputed next fire time (schedule kind only)
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl TriggerEvaluation {
    fn empty() -> Self {
        Self {
            firings: Vec::new(),
            cursor: None,
            next_fire_at: None,
        }
    }
}

/// Polymorphic entry point over all trigger strategy kinds.
pub struct TriggerDispatcher {
    dedupe_history_bound: usize,
}

impl TriggerDispatcher {
    pub fn new() -> Self {
        Self {
            dedupe_history_bound: 1000,
        }
    }

    /// Bound the item-based identifier history retained per instance.
    pub fn with_history_bound(mut self, bound: usize) -> Self {
        self.dedupe_history_bound = bound;
        self
    }

    /// Evaluate a trigger instance at `now`.
    ///
    /// Manual and webhook kinds never fire from here; schedule kinds fire
    /// when due; poll kinds fetch and dedupe. A provider fetch failure
    /// surfaces as [`TriggerError::Provider`] with no cursor update, so
    /// the next tick retries from the prior cursor.
    pub async fn evaluate(
        &self,
        definition: &TriggerDefinition,
        instance: &TriggerInstance,
        cursor: Option<DedupeCursor>,
        now: DateTime<Utc>,
    ) -> Result<TriggerEvaluation> {
        if definition.kind != instance.kind {
            return Err(TriggerError::InvalidConfiguration(format!(
                "trigger {} is {} but its definition is {}",
                instance.id, instance.kind, definition.kind
            )));
        }
        definition.validate()?;

        debug!(
            trigger_id = %instance.id,
            kind = %instance.kind,
            "Evaluating trigger"
        );

        match instance.kind {
            TriggerStrategyKind::Manual
            | TriggerStrategyKind::AppWebhook
            | TriggerStrategyKind::CustomWebhook => Ok(TriggerEvaluation::empty()),
            TriggerStrategyKind::Schedule => self.evaluate_schedule(definition, instance, now),
            TriggerStrategyKind::PollTimeBased
            | TriggerStrategyKind::PollItemBased
            | TriggerStrategyKind::PollLengthBased => {
                self.evaluate_poll(definition, instance, cursor, now).await
            }
        }
    }

    /// Match an inbound webhook delivery against a reactive trigger
    /// instance, producing at most one firing.
    pub fn match_webhook(
        &self,
        definition: &TriggerDefinition,
        instance: &TriggerInstance,
        delivery: &WebhookDelivery,
    ) -> Result<Vec<TriggerFiring>> {
        if definition.kind != instance.kind {
            return Err(TriggerError::InvalidConfiguration(format!(
                "trigger {} is {} but its definition is {}",
                instance.id, instance.kind, definition.kind
            )));
        }

        if !WebhookMatcher::matches(instance, delivery)? {
            debug!(
                trigger_id = %instance.id,
                event_type = %delivery.event_type,
                "Webhook delivery did not match"
            );
            return Ok(Vec::new());
        }

        let firing = TriggerFiring::new(
            instance.id,
            instance.workflow_id,
            delivery.received_at,
            (definition.payload)(&delivery.payload),
        )
        .with_metadata("strategy", instance.kind.as_str())
        .with_metadata("event_type", delivery.event_type.clone());

        info!(
            trigger_id = %instance.id,
            workflow_id = %instance.workflow_id,
            event_type = %delivery.event_type,
            "Webhook trigger fired"
        );

        Ok(vec![firing])
    }

    fn evaluate_schedule(
        &self,
        definition: &TriggerDefinition,
        instance: &TriggerInstance,
        now: DateTime<Utc>,
    ) -> Result<TriggerEvaluation> {
        let spec = instance.schedule.as_ref().ok_or_else(|| {
            TriggerError::InvalidConfiguration(format!(
                "schedule trigger {} has no recurrence spec",
                instance.id
            ))
        })?;

        let due_at = match instance.next_fire_at {
            Some(at) => at,
            None => next_fire_time(instance.schedule_start, spec, now)?,
        };

        if now < due_at {
            return Ok(TriggerEvaluation::empty());
        }

        // Fire times are minute-granular, so the follow-up occurrence is
        // computed strictly past the one that just fired.
        let following = next_fire_time(
            instance.schedule_start,
            spec,
            due_at + Duration::minutes(1),
        )?;

        let payload = serde_json::json!({ "scheduled_at": due_at });
        let firing = TriggerFiring::new(
            instance.id,
            instance.workflow_id,
            now,
            (definition.payload)(&payload),
        )
        .with_metadata("strategy", instance.kind.as_str());

        info!(
            trigger_id = %instance.id,
            workflow_id = %instance.workflow_id,
            due_at = %due_at,
            next = %following,
            "Schedule trigger fired"
        );

        Ok(TriggerEvaluation {
            firings: vec![firing],
            cursor: None,
            next_fire_at: Some(following),
        })
    }

    async fn evaluate_poll(
        &self,
        definition: &TriggerDefinition,
        instance: &TriggerInstance,
        cursor: Option<DedupeCursor>,
        now: DateTime<Utc>,
    ) -> Result<TriggerEvaluation> {
        let provider = definition.provider.as_ref().ok_or_else(|| {
            TriggerError::InvalidConfiguration(format!(
                "poll trigger {} has no provider client",
                instance.id
            ))
        })?;

        let cursor = match cursor {
            Some(cursor) if cursor.matches_kind(instance.kind) => cursor,
            Some(cursor) => {
                return Err(TriggerError::InvalidConfiguration(format!(
                    "trigger {} has a {cursor:?} cursor but is {}",
                    instance.id, instance.kind
                )));
            }
            None => DedupeCursor::initial_for(instance.kind).ok_or_else(|| {
                TriggerError::InvalidConfiguration(format!(
                    "{} carries no dedupe cursor",
                    instance.kind
                ))
            })?,
        };

        let items = provider
            .fetch_items(&instance.connection, &instance.provider_config)
            .await?;

        debug!(
            trigger_id = %instance.id,
            fetched = items.len(),
            "Provider poll returned"
        );

        let DedupeOutcome { new_items, cursor } = match (&cursor, instance.kind) {
            (DedupeCursor::TimeWatermark { watermark_ms }, TriggerStrategyKind::PollTimeBased) => {
                let extract = definition.timestamp.ok_or_else(|| {
                    TriggerError::InvalidConfiguration(
                        "time-based poll definition has no timestamp extractor".to_string(),
                    )
                })?;
                dedupe_time_based(&items, *watermark_ms, extract)
            }
            (DedupeCursor::SeenItems { ids }, TriggerStrategyKind::PollItemBased) => {
                let extract = definition.identity.ok_or_else(|| {
                    TriggerError::InvalidConfiguration(
                        "item-based poll definition has no identity extractor".to_string(),
                    )
                })?;
                dedupe_item_based(&items, ids, self.dedupe_history_bound, extract)
            }
            (DedupeCursor::CollectionLength { length }, TriggerStrategyKind::PollLengthBased) => {
                dedupe_length_based(&items, *length)
            }
            // Shape/kind agreement was checked above.
            _ => {
                return Err(TriggerError::InvalidConfiguration(format!(
                    "cursor shape does not match {}",
                    instance.kind
                )))
            }
        };

        let firings: Vec<TriggerFiring> = new_items
            .iter()
            .map(|item| {
                TriggerFiring::new(
                    instance.id,
                    instance.workflow_id,
                    now,
                    (definition.payload)(item),
                )
                .with_metadata("strategy", instance.kind.as_str())
            })
            .collect();

        if !firings.is_empty() {
            info!(
                trigger_id = %instance.id,
                workflow_id = %instance.workflow_id,
                count = firings.len(),
                "Poll trigger fired"
            );
        }

        Ok(TriggerEvaluation {
            firings,
            cursor: Some(cursor),
            next_fire_at: None,
        })
    }
}

impl Default for TriggerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
