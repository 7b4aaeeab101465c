//! Sink doubles — in-memory `OutputSink` implementations for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use formledger_core::error::LedgerError;
use formledger_core::event::EventId;
use formledger_core::sink::{Artifact, OutputSink, WriteOutcome};

/// A sink that keeps every artifact it is given, with the same conflict and
/// replacement rules as the file sink.
#[derive(Debug, Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<Artifact>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every accepted write, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn writes(&self) -> Vec<Artifact> {
        self.writes.lock().unwrap().clone()
    }

    /// Event ids of the accepted writes, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn event_ids(&self) -> Vec<i64> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.event_id.get())
            .collect()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn write(
        &self,
        artifact: &Artifact,
        committed_through: Option<EventId>,
    ) -> Result<WriteOutcome, LedgerError> {
        artifact.ensure_pending(committed_through)?;
        let mut writes = self.writes.lock().unwrap();
        let replaced = writes
            .iter()
            .any(|w| w.processor_id == artifact.processor_id && w.event_id == artifact.event_id);
        writes.push(artifact.clone());
        Ok(if replaced {
            WriteOutcome::Replaced
        } else {
            WriteOutcome::Written
        })
    }
}

/// A sink that sleeps before accepting each write. Useful for exercising
/// timeouts.
#[derive(Debug)]
pub struct SlowSink {
    delay: Duration,
}

impl SlowSink {
    /// Creates a sink that takes `delay` per write.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl OutputSink for SlowSink {
    async fn write(
        &self,
        _artifact: &Artifact,
        _committed_through: Option<EventId>,
    ) -> Result<WriteOutcome, LedgerError> {
        tokio::time::sleep(self.delay).await;
        Ok(WriteOutcome::Written)
    }
}
