//! `PostgreSQL` implementation of the `SchemaStore` trait.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use formledger_core::error::LedgerError;
use formledger_core::repository::SchemaStore;
use formledger_core::schema::{
    AggregateSchema, Registration, SchemaCandidate, SchemaRef, SchemaVersion,
};

use crate::schema::infrastructure;

const SELECT_VERSION: &str = "SELECT name, namespace, version, definition, fingerprint, \
     created_at FROM schema_versions WHERE name = $1 AND namespace = $2 AND version = $3";

const SELECT_LATEST: &str = "SELECT name, namespace, version, definition, fingerprint, \
     created_at FROM schema_versions WHERE name = $1 AND namespace = $2 \
     ORDER BY version DESC LIMIT 1";

const SELECT_HISTORY: &str = "SELECT name, namespace, version, definition, fingerprint, \
     created_at FROM schema_versions WHERE name = $1 AND namespace = $2 ORDER BY version";

/// PostgreSQL-backed schema registry storage.
#[derive(Debug, Clone)]
pub struct PgSchemaStore {
    pool: PgPool,
}

impl PgSchemaStore {
    /// Creates a new `PgSchemaStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn version_from_row(row: &PgRow) -> Result<SchemaVersion, LedgerError> {
    Ok(SchemaVersion {
        name: row.try_get("name").map_err(infrastructure)?,
        namespace: row.try_get("namespace").map_err(infrastructure)?,
        version: row.try_get("version").map_err(infrastructure)?,
        definition: row.try_get("definition").map_err(infrastructure)?,
        fingerprint: row.try_get("fingerprint").map_err(infrastructure)?,
        created_at: row.try_get("created_at").map_err(infrastructure)?,
    })
}

async fn latest_in(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    namespace: &str,
) -> Result<Option<SchemaVersion>, LedgerError> {
    let row = sqlx::query(SELECT_LATEST)
        .bind(name)
        .bind(namespace)
        .fetch_optional(&mut **tx)
        .await
        .map_err(infrastructure)?;
    row.as_ref().map(version_from_row).transpose()
}

#[async_trait]
impl SchemaStore for PgSchemaStore {
    #[tracing::instrument(skip(self, candidate), fields(name = %candidate.name, namespace = %candidate.namespace))]
    async fn register(
        &self,
        candidate: SchemaCandidate,
        aggregate_type: Option<&str>,
    ) -> Result<Registration, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        // Serializes registrations of the same name and namespace.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || '/' || $2))")
            .bind(&candidate.name)
            .bind(&candidate.namespace)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;

        let latest = latest_in(&mut tx, &candidate.name, &candidate.namespace).await?;
        let registration = match latest {
            Some(latest) if latest.fingerprint == candidate.fingerprint => Registration {
                schema: latest,
                created: false,
            },
            latest => {
                let schema = SchemaVersion {
                    version: latest.map_or(1, |v| v.version + 1),
                    name: candidate.name,
                    namespace: candidate.namespace,
                    definition: candidate.definition,
                    fingerprint: candidate.fingerprint,
                    created_at: candidate.registered_at,
                };
                sqlx::query(
                    "INSERT INTO schema_versions \
                     (name, namespace, version, definition, fingerprint, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(&schema.name)
                .bind(&schema.namespace)
                .bind(schema.version)
                .bind(&schema.definition)
                .bind(&schema.fingerprint)
                .bind(schema.created_at)
                .execute(&mut *tx)
                .await
                .map_err(infrastructure)?;
                Registration {
                    schema,
                    created: true,
                }
            }
        };

        if let Some(aggregate_type) = aggregate_type {
            sqlx::query(
                "INSERT INTO aggregate_schemas \
                 (aggregate_type, schema_name, schema_namespace, schema_version, updated_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (aggregate_type) DO UPDATE SET \
                 schema_name = EXCLUDED.schema_name, \
                 schema_namespace = EXCLUDED.schema_namespace, \
                 schema_version = EXCLUDED.schema_version, \
                 updated_at = EXCLUDED.updated_at",
            )
            .bind(aggregate_type)
            .bind(&registration.schema.name)
            .bind(&registration.schema.namespace)
            .bind(registration.schema.version)
            .bind(candidate.registered_at)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;
        }

        tx.commit().await.map_err(infrastructure)?;
        Ok(registration)
    }

    async fn get(&self, schema_ref: &SchemaRef) -> Result<Option<SchemaVersion>, LedgerError> {
        let row = sqlx::query(SELECT_VERSION)
            .bind(&schema_ref.name)
            .bind(&schema_ref.namespace)
            .bind(schema_ref.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(infrastructure)?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn latest(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<SchemaVersion>, LedgerError> {
        let row = sqlx::query(SELECT_LATEST)
            .bind(name)
            .bind(namespace)
            .fetch_optional(&self.pool)
            .await
            .map_err(infrastructure)?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn versions(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<SchemaVersion>, LedgerError> {
        let rows = sqlx::query(SELECT_HISTORY)
            .bind(name)
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        rows.iter().map(version_from_row).collect()
    }

    async fn active_for(
        &self,
        aggregate_type: &str,
    ) -> Result<Option<AggregateSchema>, LedgerError> {
        let row = sqlx::query(
            "SELECT aggregate_type, schema_name, schema_namespace, schema_version, updated_at \
             FROM aggregate_schemas WHERE aggregate_type = $1",
        )
        .bind(aggregate_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;

        row.map(|row| {
            Ok::<_, LedgerError>(AggregateSchema {
                aggregate_type: row.try_get("aggregate_type").map_err(infrastructure)?,
                schema_ref: SchemaRef {
                    name: row.try_get("schema_name").map_err(infrastructure)?,
                    namespace: row.try_get("schema_namespace").map_err(infrastructure)?,
                    version: row.try_get("schema_version").map_err(infrastructure)?,
                },
                updated_at: row.try_get("updated_at").map_err(infrastructure)?,
            })
        })
        .transpose()
    }
}
