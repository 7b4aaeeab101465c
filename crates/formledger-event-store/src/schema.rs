//! Event store database schema and SQL error classification.

use formledger_core::error::LedgerError;
use sqlx::PgPool;
use sqlx::migrate::Migrator;

/// Embedded migrations from the workspace `migrations/` directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// `SQLSTATE` raised by a unique constraint.
pub const UNIQUE_VIOLATION: &str = "23505";
/// `SQLSTATE` raised by a foreign key.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";
/// `SQLSTATE` raised by the append-only triggers.
pub const RESTRICT_VIOLATION: &str = "23001";

/// Applies all pending migrations.
///
/// # Errors
///
/// Returns `LedgerError::Infrastructure` if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), LedgerError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| LedgerError::Infrastructure(format!("migration failed: {e}")))
}

/// Returns the `SQLSTATE` of a database error.
pub(crate) fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(std::borrow::Cow::into_owned),
        _ => None,
    }
}

pub(crate) fn infrastructure(err: sqlx::Error) -> LedgerError {
    LedgerError::Infrastructure(err.to_string())
}

/// Classifies a failed write: trigger rejections become `ImmutableRecord`,
/// everything unrecognised stays `Infrastructure`.
pub(crate) fn classify_write(err: sqlx::Error, record: &str) -> LedgerError {
    match sqlstate(&err).as_deref() {
        Some(RESTRICT_VIOLATION) => LedgerError::ImmutableRecord(record.to_owned()),
        _ => infrastructure(err),
    }
}
