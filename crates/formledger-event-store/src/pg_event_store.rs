//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use formledger_core::error::LedgerError;
use formledger_core::event::{Event, EventId, Metadata, NewEvent, PayloadEncoding};
use formledger_core::repository::EventStore;
use formledger_core::schema::SchemaRef;

use crate::schema::{
    FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION, classify_write, infrastructure, sqlstate,
};

const SELECT_EVENTS_AFTER: &str = "SELECT id, payload, encoding, schema_name, \
     schema_namespace, schema_version, metadata, created_at FROM events \
     WHERE id > $1 ORDER BY id LIMIT $2";

const SELECT_EVENT_BY_ID: &str = "SELECT id, payload, encoding, schema_name, \
     schema_namespace, schema_version, metadata, created_at FROM events WHERE id = $1";

/// PostgreSQL-backed event log.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &PgRow) -> Result<Event, LedgerError> {
    let id: i64 = row.try_get("id").map_err(infrastructure)?;
    let encoding: String = row.try_get("encoding").map_err(infrastructure)?;
    let metadata: Json<Metadata> = row.try_get("metadata").map_err(infrastructure)?;
    let new = NewEvent {
        payload: row.try_get("payload").map_err(infrastructure)?,
        encoding: encoding.parse::<PayloadEncoding>()?,
        schema_ref: SchemaRef {
            name: row.try_get("schema_name").map_err(infrastructure)?,
            namespace: row.try_get("schema_namespace").map_err(infrastructure)?,
            version: row.try_get("schema_version").map_err(infrastructure)?,
        },
        metadata: metadata.0,
        created_at: row.try_get("created_at").map_err(infrastructure)?,
    };
    Ok(Event::stored(EventId::new(id), new))
}

fn classify_append(err: sqlx::Error, event: &NewEvent) -> LedgerError {
    match sqlstate(&err).as_deref() {
        Some(UNIQUE_VIOLATION) => LedgerError::DuplicateEvent(
            event
                .metadata
                .submission_id()
                .map_or_else(|| "event id already exists".to_owned(), |s| {
                    format!("submission {s} is already recorded")
                }),
        ),
        Some(FOREIGN_KEY_VIOLATION) => LedgerError::schema_not_found(&event.schema_ref),
        _ => infrastructure(err),
    }
}

fn as_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventStore for PgEventStore {
    #[tracing::instrument(skip(self, event), fields(schema = %event.schema_ref))]
    async fn append(&self, event: NewEvent) -> Result<EventId, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        let id: i64 = sqlx::query_scalar(
            "UPDATE event_sequence SET last_id = last_id + 1 WHERE singleton RETURNING last_id",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(infrastructure)?;

        sqlx::query(
            "INSERT INTO events (id, payload, encoding, schema_name, schema_namespace, \
             schema_version, metadata, submission_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(&event.payload)
        .bind(event.encoding.as_str())
        .bind(&event.schema_ref.name)
        .bind(&event.schema_ref.namespace)
        .bind(event.schema_ref.version)
        .bind(Json(&event.metadata))
        .bind(event.metadata.submission_id())
        .bind(event.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_append(e, &event))?;

        tx.commit().await.map_err(infrastructure)?;
        tracing::debug!(event_id = id, "event appended");
        Ok(EventId::new(id))
    }

    async fn query(
        &self,
        since: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<Event>, LedgerError> {
        let rows = sqlx::query(SELECT_EVENTS_AFTER)
            .bind(since.map_or(0, EventId::get))
            .bind(as_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>, LedgerError> {
        let row = sqlx::query(SELECT_EVENT_BY_ID)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(infrastructure)?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn count_after(&self, since: Option<EventId>) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE id > $1")
            .bind(since.map_or(0, EventId::get))
            .fetch_one(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn latest_id(&self) -> Result<Option<EventId>, LedgerError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(id.map(EventId::new))
    }

    async fn update_event(&self, id: EventId, payload: Vec<u8>) -> Result<(), LedgerError> {
        // Issued for real so the trigger, not this method, is what refuses.
        sqlx::query("UPDATE events SET payload = $2 WHERE id = $1")
            .bind(id.get())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_write(e, &format!("event {id}")))?;
        Err(LedgerError::ImmutableRecord(format!("event {id}")))
    }

    async fn delete_event(&self, id: EventId) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| classify_write(e, &format!("event {id}")))?;
        Err(LedgerError::ImmutableRecord(format!("event {id}")))
    }
}
