//! Formledger CLI — error types.

use formledger_core::error::LedgerError;
use thiserror::Error;

/// Startup and runtime errors for the `formledger` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// A required environment variable or config value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A YAML document (config file, form definition) could not be parsed.
    #[error("invalid yaml in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A JSON document (payload, schema definition) could not be parsed.
    #[error("invalid json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Reading input or writing output failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Exporter setup failed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// An operation of the ledger itself failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CliError {
    /// Short machine-readable code, shared with `LedgerError::code` for
    /// ledger failures.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Yaml { .. } => "yaml",
            Self::Json { .. } => "json",
            Self::Database(_) => "database",
            Self::Migration(_) => "migration",
            Self::Io(_) => "io",
            Self::Telemetry(_) => "telemetry",
            Self::Ledger(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_keep_their_message_and_code() {
        let err = CliError::from(LedgerError::SchemaNotFound("forms.Intake v9".into()));

        assert_eq!(err.to_string(), "schema not found: forms.Intake v9");
        assert_eq!(err.code(), "schema_not_found");
    }

    #[test]
    fn test_yaml_error_names_file() {
        let source = serde_yaml::from_str::<u32>("[").unwrap_err();

        let err = CliError::Yaml {
            path: "formledger.yaml".into(),
            source,
        };

        assert!(err.to_string().starts_with("invalid yaml in formledger.yaml"));
        assert_eq!(err.code(), "yaml");
    }
}
