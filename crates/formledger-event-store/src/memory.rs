//! In-memory stores with the same semantics as the PostgreSQL ones.
//!
//! Nothing here survives a restart; they back tests and embedded use.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use formledger_core::error::LedgerError;
use formledger_core::event::{Event, EventId, NewEvent};
use formledger_core::offset::{AdvanceOutcome, ConsumerOffset, OffsetOverride};
use formledger_core::repository::{EventStore, OffsetStore, SchemaStore};
use formledger_core::schema::{
    AggregateSchema, Registration, SchemaCandidate, SchemaRef, SchemaVersion,
};

use crate::cursor::{check_advance, check_skip};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct EventLog {
    events: Vec<Event>,
    submission_ids: HashSet<String>,
}

/// In-memory event log.
#[derive(Default)]
pub struct MemoryEventStore {
    log: Mutex<EventLog>,
    schemas: Option<Arc<dyn SchemaStore>>,
}

impl std::fmt::Debug for MemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventStore")
            .field("len", &lock(&self.log).events.len())
            .finish_non_exhaustive()
    }
}

impl MemoryEventStore {
    /// Creates an empty log that accepts any schema reference.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty log that rejects events whose schema reference is
    /// unknown to `schemas`, like the foreign key in PostgreSQL.
    #[must_use]
    pub fn with_schemas(schemas: Arc<dyn SchemaStore>) -> Self {
        Self {
            log: Mutex::default(),
            schemas: Some(schemas),
        }
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.log).events.len()
    }

    /// Returns `true` when no event has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn index_after(events: &[Event], since: Option<EventId>) -> usize {
    // Ids are 1-based and gapless, so the position is arithmetic.
    since.map_or(0, |id| {
        usize::try_from(id.get()).map_or(0, |n| n.min(events.len()))
    })
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: NewEvent) -> Result<EventId, LedgerError> {
        if let Some(schemas) = &self.schemas {
            if schemas.get(&event.schema_ref).await?.is_none() {
                return Err(LedgerError::schema_not_found(&event.schema_ref));
            }
        }

        let mut log = lock(&self.log);
        if let Some(submission_id) = event.metadata.submission_id() {
            if log.submission_ids.contains(submission_id) {
                return Err(LedgerError::DuplicateEvent(format!(
                    "submission {submission_id} is already recorded"
                )));
            }
        }

        let next = i64::try_from(log.events.len())
            .map_err(|e| LedgerError::Infrastructure(format!("event log overflow: {e}")))?
            + 1;
        let id = EventId::new(next);
        if let Some(submission_id) = event.metadata.submission_id() {
            log.submission_ids.insert(submission_id.to_owned());
        }
        log.events.push(Event::stored(id, event));
        Ok(id)
    }

    async fn query(
        &self,
        since: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<Event>, LedgerError> {
        let log = lock(&self.log);
        let start = index_after(&log.events, since);
        Ok(log.events[start..].iter().take(limit).cloned().collect())
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>, LedgerError> {
        let log = lock(&self.log);
        let index = usize::try_from(id.get() - 1).ok();
        Ok(index.and_then(|i| log.events.get(i)).cloned())
    }

    async fn count_after(&self, since: Option<EventId>) -> Result<u64, LedgerError> {
        let log = lock(&self.log);
        let start = index_after(&log.events, since);
        Ok((log.events.len() - start) as u64)
    }

    async fn latest_id(&self) -> Result<Option<EventId>, LedgerError> {
        Ok(lock(&self.log).events.last().map(Event::id))
    }
}

#[derive(Debug, Default)]
struct SchemaTables {
    versions: BTreeMap<(String, String), Vec<SchemaVersion>>,
    bindings: HashMap<String, AggregateSchema>,
}

/// In-memory schema store.
#[derive(Debug, Default)]
pub struct MemorySchemaStore {
    tables: Mutex<SchemaTables>,
}

impl MemorySchemaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn register(
        &self,
        candidate: SchemaCandidate,
        aggregate_type: Option<&str>,
    ) -> Result<Registration, LedgerError> {
        let mut tables = lock(&self.tables);
        let key = (candidate.name.clone(), candidate.namespace.clone());
        let history = tables.versions.entry(key).or_default();

        let registration = match history.last() {
            Some(latest) if latest.fingerprint == candidate.fingerprint => Registration {
                schema: latest.clone(),
                created: false,
            },
            latest => {
                let version = latest.map_or(1, |v| v.version + 1);
                let schema = SchemaVersion {
                    name: candidate.name,
                    namespace: candidate.namespace,
                    version,
                    definition: candidate.definition,
                    fingerprint: candidate.fingerprint,
                    created_at: candidate.registered_at,
                };
                history.push(schema.clone());
                Registration {
                    schema,
                    created: true,
                }
            }
        };

        if let Some(aggregate_type) = aggregate_type {
            tables.bindings.insert(
                aggregate_type.to_owned(),
                AggregateSchema {
                    aggregate_type: aggregate_type.to_owned(),
                    schema_ref: registration.schema.schema_ref(),
                    updated_at: candidate.registered_at,
                },
            );
        }
        Ok(registration)
    }

    async fn get(&self, schema_ref: &SchemaRef) -> Result<Option<SchemaVersion>, LedgerError> {
        let tables = lock(&self.tables);
        let key = (schema_ref.name.clone(), schema_ref.namespace.clone());
        Ok(tables.versions.get(&key).and_then(|history| {
            history
                .iter()
                .find(|v| v.version == schema_ref.version)
                .cloned()
        }))
    }

    async fn latest(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<SchemaVersion>, LedgerError> {
        let tables = lock(&self.tables);
        let key = (name.to_owned(), namespace.to_owned());
        Ok(tables.versions.get(&key).and_then(|h| h.last()).cloned())
    }

    async fn versions(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<SchemaVersion>, LedgerError> {
        let tables = lock(&self.tables);
        let key = (name.to_owned(), namespace.to_owned());
        Ok(tables.versions.get(&key).cloned().unwrap_or_default())
    }

    async fn active_for(
        &self,
        aggregate_type: &str,
    ) -> Result<Option<AggregateSchema>, LedgerError> {
        Ok(lock(&self.tables).bindings.get(aggregate_type).cloned())
    }
}

#[derive(Debug, Default)]
struct OffsetTables {
    cursors: BTreeMap<String, ConsumerOffset>,
    overrides: Vec<OffsetOverride>,
}

/// In-memory offset store.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    tables: Mutex<OffsetTables>,
}

impl MemoryOffsetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn get(&self, processor_id: &str) -> Result<Option<ConsumerOffset>, LedgerError> {
        Ok(lock(&self.tables).cursors.get(processor_id).cloned())
    }

    async fn ensure(
        &self,
        processor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumerOffset, LedgerError> {
        let mut tables = lock(&self.tables);
        Ok(tables
            .cursors
            .entry(processor_id.to_owned())
            .or_insert_with(|| ConsumerOffset {
                processor_id: processor_id.to_owned(),
                last_event_id: None,
                updated_at: now,
            })
            .clone())
    }

    async fn advance(
        &self,
        processor_id: &str,
        to: EventId,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, LedgerError> {
        let mut tables = lock(&self.tables);
        let current = tables
            .cursors
            .get(processor_id)
            .and_then(|c| c.last_event_id);
        let outcome = check_advance(processor_id, current, to)?;
        if outcome == AdvanceOutcome::Advanced {
            tables.cursors.insert(
                processor_id.to_owned(),
                ConsumerOffset {
                    processor_id: processor_id.to_owned(),
                    last_event_id: Some(to),
                    updated_at: now,
                },
            );
        }
        Ok(outcome)
    }

    async fn record_skip(&self, record: OffsetOverride) -> Result<(), LedgerError> {
        let mut tables = lock(&self.tables);
        let current = tables
            .cursors
            .get(&record.processor_id)
            .and_then(|c| c.last_event_id);
        check_skip(current, &record)?;
        tables.cursors.insert(
            record.processor_id.clone(),
            ConsumerOffset {
                processor_id: record.processor_id.clone(),
                last_event_id: Some(record.skipped_event_id),
                updated_at: record.recorded_at,
            },
        );
        tables.overrides.push(record);
        Ok(())
    }

    async fn overrides(&self, processor_id: &str) -> Result<Vec<OffsetOverride>, LedgerError> {
        Ok(lock(&self.tables)
            .overrides
            .iter()
            .filter(|o| o.processor_id == processor_id)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<ConsumerOffset>, LedgerError> {
        Ok(lock(&self.tables).cursors.values().cloned().collect())
    }
}
