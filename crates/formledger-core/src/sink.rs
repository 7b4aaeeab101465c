//! Output artifacts and the sink they are written to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::event::EventId;

/// The output of processing one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub processor_id: String,
    pub event_id: EventId,
    pub event_created_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl Artifact {
    /// Deterministic name: event timestamp, then the zero-padded event id.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}-{:012}.json",
            self.event_created_at.format("%Y%m%dT%H%M%S%6fZ"),
            self.event_id.get()
        )
    }

    /// Rejects a write for an event the processor's cursor already covers.
    ///
    /// # Errors
    ///
    /// `OutputConflict` if `committed_through` is at or past this event.
    pub fn ensure_pending(&self, committed_through: Option<EventId>) -> Result<(), LedgerError> {
        match committed_through {
            Some(cursor) if cursor >= self.event_id => Err(LedgerError::OutputConflict {
                processor_id: self.processor_id.clone(),
                event_id: self.event_id,
            }),
            _ => Ok(()),
        }
    }
}

/// What a sink did with an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// First artifact for the event.
    Written,
    /// An artifact from an earlier, unacknowledged attempt was overwritten.
    Replaced,
}

/// Destination for processor output.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Writes `artifact`. `committed_through` is the processor's cursor at
    /// the time of the write.
    ///
    /// # Errors
    ///
    /// `OutputConflict` if the event is already committed, `Infrastructure`
    /// on I/O failure.
    async fn write(
        &self,
        artifact: &Artifact,
        committed_through: Option<EventId>,
    ) -> Result<WriteOutcome, LedgerError>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn artifact(id: i64) -> Artifact {
        Artifact {
            processor_id: "archive".into(),
            event_id: EventId::new(id),
            event_created_at: Utc
                .with_ymd_and_hms(2026, 1, 15, 10, 30, 5)
                .unwrap()
                .checked_add_signed(chrono::Duration::microseconds(42))
                .unwrap(),
            body: json!({}),
        }
    }

    #[test]
    fn test_file_name_is_timestamp_then_padded_id() {
        assert_eq!(
            artifact(7).file_name(),
            "20260115T103005000042Z-000000000007.json"
        );
    }

    #[test]
    fn test_ensure_pending_rejects_committed_events() {
        let a = artifact(3);

        assert!(a.ensure_pending(None).is_ok());
        assert!(a.ensure_pending(Some(EventId::new(2))).is_ok());
        assert!(matches!(
            a.ensure_pending(Some(EventId::new(3))),
            Err(LedgerError::OutputConflict { .. })
        ));
        assert!(matches!(
            a.ensure_pending(Some(EventId::new(9))),
            Err(LedgerError::OutputConflict { .. })
        ));
    }
}
