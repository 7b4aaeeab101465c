//! Ledger error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::event::EventId;
use crate::schema::SchemaRef;

/// A single field that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path of the offending field (`address.city`, `tags[2]`).
    pub path: String,
    /// What is wrong with it.
    pub reason: String,
}

impl FieldViolation {
    /// Creates a new violation for `path`.
    #[must_use]
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<root>: {}", self.reason)
        } else {
            write!(f, "{}: {}", self.path, self.reason)
        }
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error type shared by every Formledger crate.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An attempt was made to change or remove an append-only record.
    #[error("immutable record: {0} cannot be modified or deleted")]
    ImmutableRecord(String),

    /// An event with the same identity already exists.
    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    /// The referenced schema version does not exist.
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// Data does not conform to its schema.
    #[error("schema validation failed: {}", join_violations(.0))]
    SchemaValidation(Vec<FieldViolation>),

    /// Stored bytes could not be decoded with the schema they reference.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A cursor was asked to move backward.
    #[error(
        "stale offset for processor {processor_id}: cursor is at {current}, refused to move to {requested}"
    )]
    StaleOffset {
        /// The processor whose cursor was targeted.
        processor_id: String,
        /// The cursor's current position.
        current: EventId,
        /// The rejected position.
        requested: EventId,
    },

    /// A template referenced a path that is absent from its context.
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    /// Invalid static configuration (templates, processors, schemas).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An artifact already exists for an event that was processed successfully.
    #[error("output conflict: processor {processor_id} already delivered event {event_id}")]
    OutputConflict {
        /// The processor owning the artifact.
        processor_id: String,
        /// The event the artifact belongs to.
        event_id: EventId,
    },

    /// A per-event side effect exceeded its time budget.
    #[error("processing timeout: event {event_id} exceeded {timeout_ms}ms")]
    ProcessingTimeout {
        /// The event whose processing timed out.
        event_id: EventId,
        /// The configured budget in milliseconds.
        timeout_ms: u64,
    },

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl LedgerError {
    /// Shorthand for a `SchemaNotFound` error naming `schema_ref`.
    #[must_use]
    pub fn schema_not_found(schema_ref: &SchemaRef) -> Self {
        Self::SchemaNotFound(schema_ref.to_string())
    }

    /// Returns a short, stable code for the error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ImmutableRecord(_) => "immutable_record",
            Self::DuplicateEvent(_) => "duplicate_event",
            Self::SchemaNotFound(_) => "schema_not_found",
            Self::SchemaValidation(_) => "schema_validation",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::StaleOffset { .. } => "stale_offset",
            Self::UndefinedVariable(_) => "undefined_variable",
            Self::Configuration(_) => "configuration",
            Self::OutputConflict { .. } => "output_conflict",
            Self::ProcessingTimeout { .. } => "processing_timeout",
            Self::Infrastructure(_) => "infrastructure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_validation_message_lists_every_field() {
        let err = LedgerError::SchemaValidation(vec![
            FieldViolation::new("name", "missing required field"),
            FieldViolation::new("tags[1]", "expected string, found number"),
        ]);

        assert_eq!(
            err.to_string(),
            "schema validation failed: name: missing required field; tags[1]: expected string, found number"
        );
    }

    #[test]
    fn test_stale_offset_message_names_processor() {
        let err = LedgerError::StaleOffset {
            processor_id: "archive".into(),
            current: EventId::new(7),
            requested: EventId::new(3),
        };

        assert!(err.to_string().contains("archive"));
        assert_eq!(err.code(), "stale_offset");
    }
}
