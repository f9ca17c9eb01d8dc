//! Poll deduplication strategies
//!
//! Each poll-based trigger kind pairs a provider fetch with one of three
//! pure dedupe functions: which raw items are new, and what cursor to
//! persist. The functions here never touch storage; the scheduler reads
//! the cursor before the fetch and writes it strictly after the emitted
//! items have been handed off, so a failed poll retries with the prior
//! cursor (at-least-once, never skip-on-failure).

use crate::definition::{IdentityExtractor, TimestampExtractor};
use crate::Result;
use async_trait::async_trait;
use flowgrid_core::{DedupeCursor, TriggerId};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result of one dedupe pass: the items to emit, in provider response
/// order, and the cursor reflecting the entire batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupeOutcome {
    pub new_items: Vec<Value>,
    pub cursor: DedupeCursor,
}

/// Time-based dedupe: emit items whose extracted timestamp is strictly
/// greater than the stored watermark.
///
/// Known limitation, preserved deliberately: two true events sharing one
/// timestamp only ever emit the first encountered, because equal
/// timestamps are treated as already seen.
pub fn dedupe_time_based(
    items: &[Value],
    watermark_ms: Option<i64>,
    extract: TimestampExtractor,
) -> DedupeOutcome {
    let mut new_items = Vec::new();
    let mut max_seen = watermark_ms;

    for item in items {
        let Some(timestamp) = extract(item) else {
            // Items the extractor cannot read are excluded and do not
            // advance the watermark; a later well-formed appearance
            // still fires.
            continue;
        };

        if watermark_ms.map_or(true, |mark| timestamp > mark) {
            new_items.push(item.clone());
        }
        if max_seen.map_or(true, |seen| timestamp > seen) {
            max_seen = Some(timestamp);
        }
    }

    DedupeOutcome {
        new_items,
        cursor: DedupeCursor::TimeWatermark {
            watermark_ms: max_seen,
        },
    }
}

/// Item-based dedupe: emit items whose identifier is not in the stored
/// history. The updated history appends new identifiers and is bounded
/// to the most recent `retention` entries, oldest evicted first.
pub fn dedupe_item_based(
    items: &[Value],
    seen: &[String],
    retention: usize,
    extract: IdentityExtractor,
) -> DedupeOutcome {
    let mut new_items = Vec::new();
    let mut ids = seen.to_vec();

    for item in items {
        let Some(id) = extract(item) else {
            continue;
        };

        if !ids.contains(&id) {
            new_items.push(item.clone());
            ids.push(id);
        }
    }

    if ids.len() > retention {
        ids.drain(..ids.len() - retention);
    }

    DedupeOutcome {
        new_items,
        cursor: DedupeCursor::SeenItems { ids },
    }
}

/// Length-based dedupe: emit the suffix of the collection beyond the
/// previously stored length. Assumes the provider appends without
/// reordering or deleting; a shrunken collection clamps to "no new
/// items" and never decreases the cursor.
pub fn dedupe_length_based(items: &[Value], previous_length: usize) -> DedupeOutcome {
    let (new_items, length) = if items.len() > previous_length {
        (items[previous_length..].to_vec(), items.len())
    } else {
        (Vec::new(), previous_length)
    };

    DedupeOutcome {
        new_items,
        cursor: DedupeCursor::CollectionLength { length },
    }
}

/// Persistence boundary for dedupe cursors, keyed per trigger instance.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, trigger_id: TriggerId) -> Result<Option<DedupeCursor>>;
    async fn store(&self, trigger_id: TriggerId, cursor: DedupeCursor) -> Result<()>;
    async fn clear(&self, trigger_id: TriggerId) -> Result<()>;
}

/// In-memory cursor store
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<TriggerId, DedupeCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, trigger_id: TriggerId) -> Result<Option<DedupeCursor>> {
        let cursors = self.cursors.read().await;
        Ok(cursors.get(&trigger_id).cloned())
    }

    async fn store(&self, trigger_id: TriggerId, cursor: DedupeCursor) -> Result<()> {
        let mut cursors = self.cursors.write().await;
        cursors.insert(trigger_id, cursor);
        Ok(())
    }

    async fn clear(&self, trigger_id: TriggerId) -> Result<()> {
        let mut cursors = self.cursors.write().await;
        cursors.remove(&trigger_id);
        Ok(())
    }
}
