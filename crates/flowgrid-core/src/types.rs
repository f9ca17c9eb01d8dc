use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Newtype wrappers for type safety

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerId(Uuid);

impl TriggerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TriggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Trigger strategy kinds

/// How a trigger detects new work.
///
/// This is a closed set persisted alongside each trigger instance; the
/// scheduler applies kind-specific timing policy, so an open plugin
/// registry is deliberately not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerStrategyKind {
    /// Never auto-fires; only user- or action-invoked.
    #[serde(rename = "manual")]
    Manual,
    /// Fires on a calendar recurrence.
    #[serde(rename = "schedule")]
    Schedule,
    /// Polls the provider and dedupes by item timestamp watermark.
    #[serde(rename = "poll.dedupe-time-based")]
    PollTimeBased,
    /// Polls the provider and dedupes by seen item identifiers.
    #[serde(rename = "poll.dedupe-item-based")]
    PollItemBased,
    /// Polls the provider and dedupes by collection length.
    #[serde(rename = "poll.dedupe-length-based")]
    PollLengthBased,
    /// Reactive: the integration's own webhook delivers events.
    #[serde(rename = "webhook.app")]
    AppWebhook,
    /// Reactive: a user-defined webhook endpoint delivers events.
    #[serde(rename = "webhook.custom")]
    CustomWebhook,
}

impl TriggerStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::PollTimeBased => "poll.dedupe-time-based",
            Self::PollItemBased => "poll.dedupe-item-based",
            Self::PollLengthBased => "poll.dedupe-length-based",
            Self::AppWebhook => "webhook.app",
            Self::CustomWebhook => "webhook.custom",
        }
    }

    /// Whether this kind is driven by the scheduler's fixed polling interval.
    pub fn is_poll(&self) -> bool {
        matches!(
            self,
            Self::PollTimeBased | Self::PollItemBased | Self::PollLengthBased
        )
    }

    /// Whether this kind is purely reactive to inbound deliveries.
    pub fn is_webhook(&self) -> bool {
        matches!(self, Self::AppWebhook | Self::CustomWebhook)
    }
}

impl std::fmt::Display for TriggerStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Execution lifecycle

/// Status of one fired execution.
///
/// Transitions are made exclusively by the execution engine; this core
/// only observes status via polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Scheduled,
    Running,
    Success,
    Failed,
    NeedsInput,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::NeedsInput => "NEEDS_INPUT",
        }
    }

    /// Terminal states are `SUCCESS` and `FAILED`; everything else may
    /// still transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single firing's unit of work, as observed at the execution engine
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    pub status_message: Option<String>,
    pub output: Option<serde_json::Value>,
}

impl Execution {
    pub fn new(id: ExecutionId, status: ExecutionStatus) -> Self {
        Self {
            id,
            status,
            status_message: None,
            output: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }
}

// Dedupe cursors

/// Persisted bookmark preventing the same provider event from firing
/// twice. Modeled as a typed sum keyed by strategy kind so the dedupe
/// algorithm and its stored state cannot drift out of sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DedupeCursor {
    /// Time-based: a single watermark instant in epoch milliseconds.
    /// `None` before the first successful poll.
    TimeWatermark { watermark_ms: Option<i64> },
    /// Item-based: identifiers seen recently, oldest first, bounded to a
    /// retention window.
    SeenItems { ids: Vec<String> },
    /// Length-based: the previously observed collection length.
    CollectionLength { length: usize },
}

impl DedupeCursor {
    /// The empty cursor a trigger instance of the given kind starts with.
    /// Returns `None` for kinds that carry no cursor.
    pub fn initial_for(kind: TriggerStrategyKind) -> Option<Self> {
        match kind {
            TriggerStrategyKind::PollTimeBased => {
                Some(Self::TimeWatermark { watermark_ms: None })
            }
            TriggerStrategyKind::PollItemBased => Some(Self::SeenItems { ids: Vec::new() }),
            TriggerStrategyKind::PollLengthBased => Some(Self::CollectionLength { length: 0 }),
            _ => None,
        }
    }

    /// Whether this cursor shape belongs to the given strategy kind.
    pub fn matches_kind(&self, kind: TriggerStrategyKind) -> bool {
        matches!(
            (self, kind),
            (Self::TimeWatermark { .. }, TriggerStrategyKind::PollTimeBased)
                | (Self::SeenItems { .. }, TriggerStrategyKind::PollItemBased)
                | (Self::CollectionLength { .. }, TriggerStrategyKind::PollLengthBased)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_uniqueness() {
        let a = TriggerId::new();
        let b = TriggerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_strategy_kind_wire_strings() {
        let kind = TriggerStrategyKind::PollTimeBased;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"poll.dedupe-time-based\"");

        let parsed: TriggerStrategyKind = serde_json::from_str("\"webhook.custom\"").unwrap();
        assert_eq!(parsed, TriggerStrategyKind::CustomWebhook);
    }

    #[test]
    fn test_strategy_kind_classification() {
        assert!(TriggerStrategyKind::PollItemBased.is_poll());
        assert!(!TriggerStrategyKind::Schedule.is_poll());
        assert!(TriggerStrategyKind::AppWebhook.is_webhook());
        assert!(!TriggerStrategyKind::Manual.is_webhook());
    }

    #[test]
    fn test_execution_status_terminal() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Scheduled.is_terminal());
        assert!(!ExecutionStatus::NeedsInput.is_terminal());
    }

    #[test]
    fn test_execution_status_wire_strings() {
        let json = serde_json::to_string(&ExecutionStatus::NeedsInput).unwrap();
        assert_eq!(json, "\"NEEDS_INPUT\"");
    }

    #[test]
    fn test_initial_cursor_per_kind() {
        assert_eq!(
            DedupeCursor::initial_for(TriggerStrategyKind::PollTimeBased),
            Some(DedupeCursor::TimeWatermark { watermark_ms: None })
        );
        assert_eq!(
            DedupeCursor::initial_for(TriggerStrategyKind::PollLengthBased),
            Some(DedupeCursor::CollectionLength { length: 0 })
        );
        assert_eq!(DedupeCursor::initial_for(TriggerStrategyKind::Manual), None);
    }

    #[test]
    fn test_cursor_kind_matching() {
        let cursor = DedupeCursor::SeenItems { ids: vec![] };
        assert!(cursor.matches_kind(TriggerStrategyKind::PollItemBased));
        assert!(!cursor.matches_kind(TriggerStrategyKind::PollTimeBased));
    }
}
