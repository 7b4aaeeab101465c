//! Consumer offsets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventId;

/// A processor's cursor: the last event it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerOffset {
    /// The owning processor.
    pub processor_id: String,
    /// Last successfully processed event, `None` before the first success.
    pub last_event_id: Option<EventId>,
    /// When the cursor last moved.
    pub updated_at: DateTime<Utc>,
}

/// What an `advance` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The cursor moved forward.
    Advanced,
    /// The cursor was already at the requested event (idempotent retry).
    Unchanged,
}

/// Audit record of an operator moving a cursor past an event without
/// processing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetOverride {
    /// The processor whose cursor moved.
    pub processor_id: String,
    /// The event that was skipped.
    pub skipped_event_id: EventId,
    /// Cursor position before the skip.
    pub previous_event_id: Option<EventId>,
    /// Why the event was skipped.
    pub reason: String,
    /// Who recorded the skip.
    pub operator: String,
    /// When the skip was recorded.
    pub recorded_at: DateTime<Utc>,
}
