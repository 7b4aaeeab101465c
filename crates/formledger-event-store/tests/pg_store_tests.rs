//! Integration tests for the PostgreSQL stores.
//!
//! Each test gets a fresh database from `sqlx::test`; they are ignored unless
//! `DATABASE_URL` points at a server that allows creating databases.

use chrono::{DateTime, TimeZone, Utc};
use formledger_core::error::LedgerError;
use formledger_core::event::{EventId, Metadata, NewEvent, PayloadEncoding};
use formledger_core::offset::{AdvanceOutcome, OffsetOverride};
use formledger_core::repository::{EventStore, OffsetStore, SchemaStore};
use formledger_core::schema::{SchemaCandidate, SchemaRef};
use formledger_event_store::{PgEventStore, PgOffsetStore, PgSchemaStore};
use sqlx::PgPool;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

fn candidate(fingerprint: &str) -> SchemaCandidate {
    SchemaCandidate {
        name: "Nda".into(),
        namespace: "forms".into(),
        definition: serde_json::json!({"type": "record", "name": "Nda", "fields": []}),
        fingerprint: fingerprint.into(),
        registered_at: fixed_now(),
    }
}

fn new_event(submission_id: &str) -> NewEvent {
    NewEvent {
        payload: vec![2, 4, 6],
        encoding: PayloadEncoding::Binary,
        schema_ref: SchemaRef::new("Nda", "forms", 1),
        metadata: Metadata::new()
            .with("aggregate_type", "nda")
            .with("submission_id", submission_id),
        created_at: fixed_now(),
    }
}

async fn seeded(pool: &PgPool) -> PgEventStore {
    PgSchemaStore::new(pool.clone())
        .register(candidate("aaa"), Some("nda"))
        .await
        .unwrap();
    PgEventStore::new(pool.clone())
}

// --- events ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_append_and_query_round_trip(pool: PgPool) {
    let store = seeded(&pool).await;

    let first = store.append(new_event("a")).await.unwrap();
    let second = store.append(new_event("b")).await.unwrap();
    let events = store.query(None, 10).await.unwrap();

    assert_eq!(first, EventId::new(1));
    assert_eq!(second, EventId::new(2));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].payload(), &[2, 4, 6]);
    assert_eq!(events[0].created_at(), fixed_now());
    assert_eq!(events[1].metadata().submission_id(), Some("b"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_failed_append_keeps_ids_gapless(pool: PgPool) {
    let store = seeded(&pool).await;
    store.append(new_event("a")).await.unwrap();

    let duplicate = store.append(new_event("a")).await;
    let next = store.append(new_event("b")).await.unwrap();

    assert!(matches!(duplicate, Err(LedgerError::DuplicateEvent(_))));
    assert_eq!(next, EventId::new(2));
    assert_eq!(store.count_after(None).await.unwrap(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_unknown_schema_reference_is_rejected(pool: PgPool) {
    let store = PgEventStore::new(pool);

    let result = store.append(new_event("a")).await;

    assert!(matches!(result, Err(LedgerError::SchemaNotFound(_))));
    assert_eq!(store.latest_id().await.unwrap(), None);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_trigger_rejects_update_and_delete(pool: PgPool) {
    let store = seeded(&pool).await;
    let id = store.append(new_event("a")).await.unwrap();

    let update = store.update_event(id, vec![9]).await;
    let delete = store.delete_event(id).await;
    let raw = sqlx::query("UPDATE events SET metadata = '{}' WHERE id = 1")
        .execute(&pool)
        .await;

    assert!(matches!(update, Err(LedgerError::ImmutableRecord(_))));
    assert!(matches!(delete, Err(LedgerError::ImmutableRecord(_))));
    assert!(raw.is_err());
    let reloaded = store.get(id).await.unwrap().unwrap();
    assert_eq!(reloaded.payload(), &[2, 4, 6]);
}

// --- schemas ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_register_dedups_and_versions(pool: PgPool) {
    let store = PgSchemaStore::new(pool);

    let first = store.register(candidate("aaa"), Some("nda")).await.unwrap();
    let again = store.register(candidate("aaa"), Some("nda")).await.unwrap();
    let changed = store.register(candidate("bbb"), Some("nda")).await.unwrap();

    assert!(first.created);
    assert!(!again.created);
    assert_eq!(changed.schema.version, 2);
    let v1 = store
        .get(&SchemaRef::new("Nda", "forms", 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v1.fingerprint, "aaa");
    let binding = store.active_for("nda").await.unwrap().unwrap();
    assert_eq!(binding.schema_ref.version, 2);
    assert_eq!(store.versions("Nda", "forms").await.unwrap().len(), 2);
}

// --- offsets ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_offsets_are_monotonic(pool: PgPool) {
    let events = seeded(&pool).await;
    for s in ["a", "b", "c"] {
        events.append(new_event(s)).await.unwrap();
    }
    let offsets = PgOffsetStore::new(pool);

    let created = offsets.ensure("archive", fixed_now()).await.unwrap();
    let advanced = offsets
        .advance("archive", EventId::new(2), fixed_now())
        .await
        .unwrap();
    let repeated = offsets
        .advance("archive", EventId::new(2), fixed_now())
        .await
        .unwrap();
    let backward = offsets
        .advance("archive", EventId::new(1), fixed_now())
        .await;

    assert_eq!(created.last_event_id, None);
    assert_eq!(advanced, AdvanceOutcome::Advanced);
    assert_eq!(repeated, AdvanceOutcome::Unchanged);
    assert!(matches!(backward, Err(LedgerError::StaleOffset { .. })));
    let cursor = offsets.get("archive").await.unwrap().unwrap();
    assert_eq!(cursor.last_event_id, Some(EventId::new(2)));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_record_skip_writes_audit_row_and_moves_cursor(pool: PgPool) {
    let events = seeded(&pool).await;
    events.append(new_event("a")).await.unwrap();
    let offsets = PgOffsetStore::new(pool);
    let record = OffsetOverride {
        processor_id: "archive".into(),
        skipped_event_id: EventId::new(1),
        previous_event_id: None,
        reason: "poison payload".into(),
        operator: "ops".into(),
        recorded_at: fixed_now(),
    };

    offsets.record_skip(record.clone()).await.unwrap();
    let replay = offsets.record_skip(record.clone()).await;

    assert!(matches!(replay, Err(LedgerError::StaleOffset { .. })));
    assert_eq!(offsets.overrides("archive").await.unwrap(), vec![record]);
    let cursor = offsets.get("archive").await.unwrap().unwrap();
    assert_eq!(cursor.last_event_id, Some(EventId::new(1)));
}
