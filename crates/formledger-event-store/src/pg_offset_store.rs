//! `PostgreSQL` implementation of the `OffsetStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use formledger_core::error::LedgerError;
use formledger_core::event::EventId;
use formledger_core::offset::{AdvanceOutcome, ConsumerOffset, OffsetOverride};
use formledger_core::repository::OffsetStore;

use crate::cursor::{check_advance, check_skip};
use crate::schema::infrastructure;

/// PostgreSQL-backed consumer offsets.
#[derive(Debug, Clone)]
pub struct PgOffsetStore {
    pool: PgPool,
}

impl PgOffsetStore {
    /// Creates a new `PgOffsetStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn offset_from_row(row: &PgRow) -> Result<ConsumerOffset, LedgerError> {
    let last: Option<i64> = row.try_get("last_event_id").map_err(infrastructure)?;
    Ok(ConsumerOffset {
        processor_id: row.try_get("processor_id").map_err(infrastructure)?,
        last_event_id: last.map(EventId::new),
        updated_at: row.try_get("updated_at").map_err(infrastructure)?,
    })
}

fn override_from_row(row: &PgRow) -> Result<OffsetOverride, LedgerError> {
    let skipped: i64 = row.try_get("skipped_event_id").map_err(infrastructure)?;
    let previous: Option<i64> = row.try_get("previous_event_id").map_err(infrastructure)?;
    Ok(OffsetOverride {
        processor_id: row.try_get("processor_id").map_err(infrastructure)?,
        skipped_event_id: EventId::new(skipped),
        previous_event_id: previous.map(EventId::new),
        reason: row.try_get("reason").map_err(infrastructure)?,
        operator: row.try_get("operator").map_err(infrastructure)?,
        recorded_at: row.try_get("recorded_at").map_err(infrastructure)?,
    })
}

/// Locks the processor's row (creating it if needed) and returns its cursor.
async fn lock_cursor(
    conn: &mut sqlx::PgConnection,
    processor_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<EventId>, LedgerError> {
    sqlx::query(
        "INSERT INTO consumer_offsets (processor_id, last_event_id, updated_at) \
         VALUES ($1, NULL, $2) ON CONFLICT (processor_id) DO NOTHING",
    )
    .bind(processor_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(infrastructure)?;

    let current: Option<i64> = sqlx::query_scalar(
        "SELECT last_event_id FROM consumer_offsets WHERE processor_id = $1 FOR UPDATE",
    )
    .bind(processor_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(infrastructure)?;
    Ok(current.map(EventId::new))
}

async fn move_cursor(
    conn: &mut sqlx::PgConnection,
    processor_id: &str,
    to: EventId,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    sqlx::query(
        "UPDATE consumer_offsets SET last_event_id = $2, updated_at = $3 WHERE processor_id = $1",
    )
    .bind(processor_id)
    .bind(to.get())
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(infrastructure)?;
    Ok(())
}

#[async_trait]
impl OffsetStore for PgOffsetStore {
    async fn get(&self, processor_id: &str) -> Result<Option<ConsumerOffset>, LedgerError> {
        let row = sqlx::query(
            "SELECT processor_id, last_event_id, updated_at FROM consumer_offsets \
             WHERE processor_id = $1",
        )
        .bind(processor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;
        row.as_ref().map(offset_from_row).transpose()
    }

    async fn ensure(
        &self,
        processor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumerOffset, LedgerError> {
        let row = sqlx::query(
            "INSERT INTO consumer_offsets (processor_id, last_event_id, updated_at) \
             VALUES ($1, NULL, $2) \
             ON CONFLICT (processor_id) DO UPDATE SET processor_id = EXCLUDED.processor_id \
             RETURNING processor_id, last_event_id, updated_at",
        )
        .bind(processor_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(infrastructure)?;
        offset_from_row(&row)
    }

    #[tracing::instrument(skip(self, now), fields(event_id = %to))]
    async fn advance(
        &self,
        processor_id: &str,
        to: EventId,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        let current = lock_cursor(&mut tx, processor_id, now).await?;
        let outcome = check_advance(processor_id, current, to)?;
        if outcome == AdvanceOutcome::Advanced {
            move_cursor(&mut tx, processor_id, to, now).await?;
        }
        tx.commit().await.map_err(infrastructure)?;
        Ok(outcome)
    }

    async fn record_skip(&self, record: OffsetOverride) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        let current = lock_cursor(&mut tx, &record.processor_id, record.recorded_at).await?;
        check_skip(current, &record)?;

        sqlx::query(
            "INSERT INTO offset_overrides \
             (processor_id, skipped_event_id, previous_event_id, reason, operator, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.processor_id)
        .bind(record.skipped_event_id.get())
        .bind(record.previous_event_id.map(EventId::get))
        .bind(&record.reason)
        .bind(&record.operator)
        .bind(record.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(infrastructure)?;

        move_cursor(
            &mut tx,
            &record.processor_id,
            record.skipped_event_id,
            record.recorded_at,
        )
        .await?;
        tx.commit().await.map_err(infrastructure)
    }

    async fn overrides(&self, processor_id: &str) -> Result<Vec<OffsetOverride>, LedgerError> {
        let rows = sqlx::query(
            "SELECT processor_id, skipped_event_id, previous_event_id, reason, operator, \
             recorded_at FROM offset_overrides WHERE processor_id = $1 ORDER BY id",
        )
        .bind(processor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;
        rows.iter().map(override_from_row).collect()
    }

    async fn list(&self) -> Result<Vec<ConsumerOffset>, LedgerError> {
        let rows = sqlx::query(
            "SELECT processor_id, last_event_id, updated_at FROM consumer_offsets \
             ORDER BY processor_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;
        rows.iter().map(offset_from_row).collect()
    }
}
