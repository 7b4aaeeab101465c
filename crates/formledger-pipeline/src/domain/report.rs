//! Structured outcome of a `consume` run.

use std::fmt;

use uuid::Uuid;

use formledger_core::error::LedgerError;
use formledger_core::event::EventId;

/// The step of per-event processing that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The fetched batch did not continue the processor's stream.
    Fetch,
    Schema,
    Decode,
    Transform,
    Output,
    Advance,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Schema => "schema",
            Self::Decode => "decode",
            Self::Transform => "transform",
            Self::Output => "output",
            Self::Advance => "advance",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The event that stopped a run, and why.
#[derive(Debug)]
pub struct EventFailure {
    pub processor_id: String,
    pub event_id: EventId,
    pub phase: Phase,
    pub error: LedgerError,
}

impl fmt::Display for EventFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processor {} failed on event {} during {}: {}",
            self.processor_id, self.event_id, self.phase, self.error
        )
    }
}

/// What one `consume` invocation did.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub processor_id: String,
    /// Events delivered to the sink and committed.
    pub processed_count: u64,
    /// Events the processor's filter declined; committed without output.
    pub filtered_count: u64,
    /// 1 when the run stopped on a failure, else 0.
    pub failed_count: u64,
    /// Events still after the cursor when the run ended.
    pub remaining_count: u64,
    /// Artifacts that overwrote output from an attempt whose cursor advance
    /// never happened.
    pub replaced_artifacts: u64,
    /// The cursor when the run ended.
    pub last_event_id: Option<EventId>,
    pub failure: Option<EventFailure>,
}

impl RunReport {
    pub(crate) fn new(run_id: Uuid, processor_id: &str, cursor: Option<EventId>) -> Self {
        Self {
            run_id,
            processor_id: processor_id.to_owned(),
            processed_count: 0,
            filtered_count: 0,
            failed_count: 0,
            remaining_count: 0,
            replaced_artifacts: 0,
            last_event_id: cursor,
            failure: None,
        }
    }

    /// Whether the run ended without a failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// One line suitable for an operator.
    #[must_use]
    pub fn summary(&self) -> String {
        let cursor = self
            .last_event_id
            .map_or_else(|| "none".to_owned(), |id| id.to_string());
        let mut line = format!(
            "{}: processed {}, filtered {}, failed {}, remaining {}, offset {cursor}",
            self.processor_id,
            self.processed_count,
            self.filtered_count,
            self.failed_count,
            self.remaining_count,
        );
        if self.replaced_artifacts > 0 {
            line.push_str(&format!(", replaced {} artifact(s)", self.replaced_artifacts));
        }
        if let Some(failure) = &self.failure {
            line.push_str(&format!(
                "; stopped at event {} ({}): {}",
                failure.event_id, failure.phase, failure.error
            ));
        }
        line
    }
}
