//! Storage abstractions for events, schemas and offsets.

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::event::{Event, EventId, NewEvent};
use crate::offset::{AdvanceOutcome, ConsumerOffset, OffsetOverride};
use crate::schema::{AggregateSchema, Registration, SchemaCandidate, SchemaRef, SchemaVersion};

/// Append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event atomically and returns the id the store assigned.
    ///
    /// # Errors
    ///
    /// `DuplicateEvent` if the event's identity already exists,
    /// `SchemaNotFound` if its schema reference is unknown,
    /// `Infrastructure` on storage failure.
    async fn append(&self, event: NewEvent) -> Result<EventId, LedgerError>;

    /// Returns up to `limit` events strictly after `since`, ascending.
    /// `None` reads from the beginning of the log.
    async fn query(&self, since: Option<EventId>, limit: usize)
    -> Result<Vec<Event>, LedgerError>;

    /// Loads a single event.
    async fn get(&self, id: EventId) -> Result<Option<Event>, LedgerError>;

    /// Counts events strictly after `since`.
    async fn count_after(&self, since: Option<EventId>) -> Result<u64, LedgerError>;

    /// Returns the newest event id, if the log is not empty.
    async fn latest_id(&self) -> Result<Option<EventId>, LedgerError>;

    /// Events are immutable: every implementation rejects this.
    ///
    /// # Errors
    ///
    /// Always `ImmutableRecord`.
    async fn update_event(&self, id: EventId, _payload: Vec<u8>) -> Result<(), LedgerError> {
        Err(LedgerError::ImmutableRecord(format!("event {id}")))
    }

    /// Events are never deleted: every implementation rejects this.
    ///
    /// # Errors
    ///
    /// Always `ImmutableRecord`.
    async fn delete_event(&self, id: EventId) -> Result<(), LedgerError> {
        Err(LedgerError::ImmutableRecord(format!("event {id}")))
    }
}

/// Append-only store of schema versions and aggregate bindings.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Registers `candidate`: returns the latest version unchanged when its
    /// fingerprint matches, otherwise writes `latest + 1`. When
    /// `aggregate_type` is given, the aggregate's active version is moved to
    /// the result in the same transaction.
    async fn register(
        &self,
        candidate: SchemaCandidate,
        aggregate_type: Option<&str>,
    ) -> Result<Registration, LedgerError>;

    /// Loads one version.
    async fn get(&self, schema_ref: &SchemaRef) -> Result<Option<SchemaVersion>, LedgerError>;

    /// Loads the newest version for a name and namespace.
    async fn latest(&self, name: &str, namespace: &str)
    -> Result<Option<SchemaVersion>, LedgerError>;

    /// Lists every version for a name and namespace, oldest first.
    async fn versions(&self, name: &str, namespace: &str)
    -> Result<Vec<SchemaVersion>, LedgerError>;

    /// Loads the active binding for an aggregate type.
    async fn active_for(&self, aggregate_type: &str)
    -> Result<Option<AggregateSchema>, LedgerError>;
}

/// Per-processor cursors.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Loads a processor's cursor.
    async fn get(&self, processor_id: &str) -> Result<Option<ConsumerOffset>, LedgerError>;

    /// Loads the cursor, creating an empty one on first use.
    async fn ensure(
        &self,
        processor_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<ConsumerOffset, LedgerError>;

    /// Moves the cursor to `to`.
    ///
    /// # Errors
    ///
    /// `StaleOffset` if `to` is before the current position.
    async fn advance(
        &self,
        processor_id: &str,
        to: EventId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<AdvanceOutcome, LedgerError>;

    /// Records an operator skip and moves the cursor to the skipped event in
    /// one step.
    ///
    /// # Errors
    ///
    /// `StaleOffset` if the cursor is not at `record.previous_event_id`.
    async fn record_skip(&self, record: OffsetOverride) -> Result<(), LedgerError>;

    /// Lists the skips recorded for a processor, oldest first.
    async fn overrides(&self, processor_id: &str) -> Result<Vec<OffsetOverride>, LedgerError>;

    /// Lists every cursor.
    async fn list(&self) -> Result<Vec<ConsumerOffset>, LedgerError>;
}
