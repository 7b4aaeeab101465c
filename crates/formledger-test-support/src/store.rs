//! Store doubles — fault-injecting storage implementations for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use formledger_core::error::LedgerError;
use formledger_core::event::{Event, EventId, NewEvent};
use formledger_core::offset::{AdvanceOutcome, ConsumerOffset, OffsetOverride};
use formledger_core::repository::{EventStore, OffsetStore};

fn refused() -> LedgerError {
    LedgerError::Infrastructure("connection refused".into())
}

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(&self, _event: NewEvent) -> Result<EventId, LedgerError> {
        Err(refused())
    }

    async fn query(
        &self,
        _since: Option<EventId>,
        _limit: usize,
    ) -> Result<Vec<Event>, LedgerError> {
        Err(refused())
    }

    async fn get(&self, _id: EventId) -> Result<Option<Event>, LedgerError> {
        Err(refused())
    }

    async fn count_after(&self, _since: Option<EventId>) -> Result<u64, LedgerError> {
        Err(refused())
    }

    async fn latest_id(&self) -> Result<Option<EventId>, LedgerError> {
        Err(refused())
    }
}

/// Wraps an offset store and fails the `n`th call to `advance` (1-based),
/// simulating a crash after output was written but before the cursor moved.
/// Every other call is delegated.
pub struct CrashingOffsetStore {
    inner: Arc<dyn OffsetStore>,
    crash_on: usize,
    advances: AtomicUsize,
}

impl std::fmt::Debug for CrashingOffsetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashingOffsetStore")
            .field("crash_on", &self.crash_on)
            .field("advances", &self.advances)
            .finish_non_exhaustive()
    }
}

impl CrashingOffsetStore {
    /// Crashes on the `crash_on`th advance.
    #[must_use]
    pub fn new(inner: Arc<dyn OffsetStore>, crash_on: usize) -> Self {
        Self {
            inner,
            crash_on,
            advances: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OffsetStore for CrashingOffsetStore {
    async fn get(&self, processor_id: &str) -> Result<Option<ConsumerOffset>, LedgerError> {
        self.inner.get(processor_id).await
    }

    async fn ensure(
        &self,
        processor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumerOffset, LedgerError> {
        self.inner.ensure(processor_id, now).await
    }

    async fn advance(
        &self,
        processor_id: &str,
        to: EventId,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, LedgerError> {
        let call = self.advances.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.crash_on {
            return Err(LedgerError::Infrastructure(format!(
                "simulated crash before advancing {processor_id} to {to}"
            )));
        }
        self.inner.advance(processor_id, to, now).await
    }

    async fn record_skip(&self, record: OffsetOverride) -> Result<(), LedgerError> {
        self.inner.record_skip(record).await
    }

    async fn overrides(&self, processor_id: &str) -> Result<Vec<OffsetOverride>, LedgerError> {
        self.inner.overrides(processor_id).await
    }

    async fn list(&self) -> Result<Vec<ConsumerOffset>, LedgerError> {
        self.inner.list().await
    }
}
