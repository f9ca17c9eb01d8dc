//! Trigger scheduler service
//!
//! Owns the periodic tick that drives enabled trigger instances through
//! the dispatcher and hands resulting firings to the host's worker pool
//! over an mpsc channel. Cursor and schedule state are persisted only
//! after a tick's firings have been handed off, so a crash between fetch
//! and hand-off re-delivers rather than skips.
//!
//! Parallelism across trigger instances is the host's concern; the tick
//! itself evaluates instances sequentially.

use crate::dedupe::CursorStore;
use crate::definition::TriggerCatalog;
use crate::dispatcher::{TriggerDispatcher, TriggerEvaluation};
use crate::instance::{TriggerInstance, TriggerInstanceRepository};
use crate::{Result, TriggerError};
use chrono::Utc;
use flowgrid_core::{EngineConfig, TriggerFiring, TriggerId, WebhookDelivery};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Drives enabled trigger instances on a fixed interval.
pub struct TriggerScheduler {
    repository: Arc<dyn TriggerInstanceRepository>,
    cursors: Arc<dyn CursorStore>,
    catalog: Arc<TriggerCatalog>,
    dispatcher: TriggerDispatcher,
    firing_sender: mpsc::Sender<TriggerFiring>,
    poll_interval_seconds: u64,
    running: Arc<RwLock<bool>>,
}

impl TriggerScheduler {
    pub fn new(
        repository: Arc<dyn TriggerInstanceRepository>,
        cursors: Arc<dyn CursorStore>,
        catalog: Arc<TriggerCatalog>,
        firing_sender: mpsc::Sender<TriggerFiring>,
    ) -> Self {
        Self {
            repository,
            cursors,
            catalog,
            dispatcher: TriggerDispatcher::new(),
            firing_sender,
            poll_interval_seconds: 30,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: TriggerDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Apply engine configuration: tick interval and dedupe history bound.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.poll_interval_seconds = config.scheduler.poll_interval_seconds;
        self.dispatcher = TriggerDispatcher::new().with_history_bound(config.dedupe.history_bound);
        self
    }

    /// Register a new trigger instance. Schedule kinds get their first
    /// fire time computed up front, so a misconfigured recurrence fails
    /// here rather than at the first tick.
    pub async fn create(&self, mut instance: TriggerInstance) -> Result<TriggerInstance> {
        instance.update_next_fire(Utc::now())?;
        self.repository.save(&instance).await?;

        info!(
            trigger_id = %instance.id,
            workflow_id = %instance.workflow_id,
            kind = %instance.kind,
            "Created trigger instance"
        );

        Ok(instance)
    }

    /// Enable a trigger instance, recomputing its schedule if any.
    pub async fn enable(&self, id: TriggerId) -> Result<()> {
        if let Some(mut instance) = self.repository.get(id).await? {
            instance.enabled = true;
            instance.update_next_fire(Utc::now())?;
            self.repository.update(&instance).await?;
            info!(trigger_id = %id, "Enabled trigger");
            Ok(())
        } else {
            Err(TriggerError::NotFound(id.to_string()))
        }
    }

    /// Disable a trigger instance without deleting its state.
    pub async fn disable(&self, id: TriggerId) -> Result<()> {
        if let Some(mut instance) = self.repository.get(id).await? {
            instance.enabled = false;
            self.repository.update(&instance).await?;
            info!(trigger_id = %id, "Disabled trigger");
            Ok(())
        } else {
            Err(TriggerError::NotFound(id.to_string()))
        }
    }

    /// Delete a trigger instance and its dedupe cursor.
    pub async fn delete(&self, id: TriggerId) -> Result<()> {
        self.repository.delete(id).await?;
        self.cursors.clear(id).await?;
        info!(trigger_id = %id, "Deleted trigger");
        Ok(())
    }

    /// Fire a manual trigger on behalf of a user or action invocation.
    /// Manual triggers never fire from the tick loop.
    pub async fn fire_manual(
        &self,
        id: TriggerId,
        payload: serde_json::Value,
    ) -> Result<TriggerFiring> {
        let instance = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))?;

        if instance.kind != flowgrid_core::TriggerStrategyKind::Manual {
            return Err(TriggerError::InvalidConfiguration(format!(
                "trigger {} is {}, not manual",
                instance.id, instance.kind
            )));
        }
        if !instance.enabled {
            return Err(TriggerError::InvalidConfiguration(format!(
                "manual trigger {} is disabled",
                instance.id
            )));
        }

        let firing = TriggerFiring::new(instance.id, instance.workflow_id, Utc::now(), payload)
            .with_metadata("strategy", instance.kind.as_str());
        self.firing_sender
            .send(firing.clone())
            .await
            .map_err(|_| TriggerError::ChannelClosed)?;

        info!(
            trigger_id = %instance.id,
            workflow_id = %instance.workflow_id,
            "Manual trigger fired"
        );

        Ok(firing)
    }

    /// Route an inbound webhook delivery to a reactive trigger instance,
    /// handing any firing to the worker pool.
    pub async fn handle_delivery(
        &self,
        id: TriggerId,
        delivery: &WebhookDelivery,
    ) -> Result<Vec<TriggerFiring>> {
        let instance = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))?;

        if !instance.enabled {
            debug!(trigger_id = %id, "Delivery for disabled trigger ignored");
            return Ok(Vec::new());
        }

        let definition = self.catalog.get(&instance.definition_key).ok_or_else(|| {
            TriggerError::InvalidConfiguration(format!(
                "unknown trigger definition: {}",
                instance.definition_key
            ))
        })?;

        let firings = self
            .dispatcher
            .match_webhook(&definition, &instance, delivery)?;
        for firing in &firings {
            self.firing_sender
                .send(firing.clone())
                .await
                .map_err(|_| TriggerError::ChannelClosed)?;
        }

        Ok(firings)
    }

    /// Start the scheduler loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Trigger scheduler already running");
                return;
            }
            *running = true;
        }

        info!(
            poll_interval = self.poll_interval_seconds,
            "Starting trigger scheduler"
        );

        let start = Instant::now() + std::time::Duration::from_secs(1);
        let mut interval = interval_at(
            start,
            std::time::Duration::from_secs(self.poll_interval_seconds),
        );

        loop {
            interval.tick().await;

            let running = *self.running.read().await;
            if !running {
                break;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error evaluating triggers");
            }
        }

        info!("Trigger scheduler stopped");
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping trigger scheduler");
    }

    /// Evaluate every enabled trigger instance once.
    ///
    /// Exposed so embedding hosts (and tests) can drive ticks without
    /// the background loop.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let instances = self.repository.list_enabled().await?;

        debug!(count = instances.len(), "Evaluating enabled triggers");

        for instance in instances {
            let Some(definition) = self.catalog.get(&instance.definition_key) else {
                warn!(
                    trigger_id = %instance.id,
                    definition = %instance.definition_key,
                    "Trigger references unknown definition"
                );
                continue;
            };

            let cursor = if instance.kind.is_poll() {
                self.cursors.load(instance.id).await?
            } else {
                None
            };

            let evaluation = match self
                .dispatcher
                .evaluate(&definition, &instance, cursor, now)
                .await
            {
                Ok(evaluation) => evaluation,
                Err(TriggerError::Provider(message)) => {
                    // Transient: the cursor is untouched, so the next
                    // tick retries from the same position.
                    warn!(
                        trigger_id = %instance.id,
                        error = %message,
                        "Provider poll failed; will retry next tick"
                    );
                    continue;
                }
                Err(e) => {
                    error!(
                        trigger_id = %instance.id,
                        error = %e,
                        "Trigger evaluation failed"
                    );
                    continue;
                }
            };

            self.commit(&instance, evaluation).await?;
        }

        Ok(())
    }

    /// Hand firings off, then persist cursor and schedule state. A send
    /// failure aborts before persistence so nothing is skipped.
    async fn commit(
        &self,
        instance: &TriggerInstance,
        evaluation: TriggerEvaluation,
    ) -> Result<()> {
        for firing in evaluation.firings {
            self.firing_sender
                .send(firing)
                .await
                .map_err(|_| TriggerError::ChannelClosed)?;
        }

        if let Some(cursor) = evaluation.cursor {
            self.cursors.store(instance.id, cursor).await?;
        }

        if let Some(next_fire_at) = evaluation.next_fire_at {
            let mut updated = instance.clone();
            updated.next_fire_at = Some(next_fire_at);
            self.repository.update(&updated).await?;
        }

        Ok(())
    }
}
