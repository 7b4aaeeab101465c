//! Submission ingress: the only way events enter the log.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use formledger_core::clock::Clock;
use formledger_core::error::LedgerError;
use formledger_core::event::{EventId, Metadata, NewEvent, PayloadEncoding};
use formledger_core::repository::EventStore;
use formledger_schema::{SchemaRegistry, Serializer};

/// Validates finalized submissions against their aggregate's active schema
/// and appends them.
pub struct Submitter {
    registry: Arc<SchemaRegistry>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    serializer: Serializer,
    encoding: PayloadEncoding,
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("serializer", &self.serializer)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl Submitter {
    /// Creates a submitter with a strict serializer and binary encoding.
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            events,
            clock,
            serializer: Serializer::default(),
            encoding: PayloadEncoding::default(),
        }
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Encodes `payload` with the active schema of the aggregate type named
    /// in `metadata` and appends it. Nothing is written unless the payload
    /// conforms.
    ///
    /// # Errors
    ///
    /// `Configuration` if `metadata` has no `aggregate_type`;
    /// `SchemaNotFound` if that type has no active schema;
    /// `SchemaValidation` if the payload does not conform;
    /// `DuplicateEvent` if the submission id was already recorded.
    #[tracing::instrument(skip_all, fields(aggregate_type = metadata.aggregate_type()))]
    pub async fn submit(&self, payload: &Value, metadata: Metadata) -> Result<EventId, LedgerError> {
        let aggregate_type = metadata.aggregate_type().ok_or_else(|| {
            LedgerError::Configuration("submission metadata must name an aggregate_type".into())
        })?;
        let binding = self.registry.active_for(aggregate_type).await?.ok_or_else(|| {
            LedgerError::SchemaNotFound(format!("no active schema for aggregate type '{aggregate_type}'"))
        })?;
        let schema = self.registry.resolve(&binding.schema_ref).await?;
        let payload = self.serializer.serialize(&schema, payload, self.encoding)?;

        let id = self
            .events
            .append(NewEvent {
                payload,
                encoding: self.encoding,
                schema_ref: binding.schema_ref,
                metadata,
                created_at: self.clock.now(),
            })
            .await?;
        info!(event_id = %id, "submission recorded");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use formledger_event_store::{MemoryEventStore, MemorySchemaStore};
    use formledger_test_support::FixedClock;
    use serde_json::json;

    use super::*;

    struct Fixture {
        registry: Arc<SchemaRegistry>,
        events: Arc<MemoryEventStore>,
        submitter: Submitter,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()));
        let schemas = Arc::new(MemorySchemaStore::new());
        let registry = Arc::new(SchemaRegistry::new(schemas.clone(), clock.clone()));
        registry
            .register_for_aggregate(
                "intake",
                "Intake",
                "forms",
                &json!({
                    "type": "record",
                    "name": "Intake",
                    "fields": [{"name": "name", "type": "string"}]
                }),
            )
            .await
            .unwrap();
        let events = Arc::new(MemoryEventStore::with_schemas(schemas));
        let submitter = Submitter::new(registry.clone(), events.clone(), clock);
        Fixture {
            registry,
            events,
            submitter,
        }
    }

    fn intake() -> Metadata {
        Metadata::new().with("aggregate_type", "intake")
    }

    #[tokio::test]
    async fn test_submit_stamps_active_schema_version() {
        // Arrange
        let fx = fixture().await;

        // Act
        let id = fx.submitter.submit(&json!({"name": "Ada"}), intake()).await.unwrap();

        // Assert
        let event = fx.events.get(id).await.unwrap().unwrap();
        assert_eq!(event.schema_ref().version, 1);
        assert_eq!(event.encoding(), PayloadEncoding::Binary);
        let schema = fx.registry.resolve(event.schema_ref()).await.unwrap();
        let decoded = Serializer::default()
            .deserialize(&schema, event.payload(), event.encoding())
            .unwrap();
        assert_eq!(decoded, json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_invalid_payload_writes_nothing() {
        let fx = fixture().await;

        let result = fx.submitter.submit(&json!({"name": 7}), intake()).await;

        assert!(matches!(result, Err(LedgerError::SchemaValidation(_))));
        assert!(fx.events.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_without_aggregate_type_is_rejected() {
        let fx = fixture().await;

        let result = fx.submitter.submit(&json!({"name": "Ada"}), Metadata::new()).await;

        assert!(matches!(result, Err(LedgerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unbound_aggregate_type_is_schema_not_found() {
        let fx = fixture().await;
        let metadata = Metadata::new().with("aggregate_type", "payroll");

        let result = fx.submitter.submit(&json!({"name": "Ada"}), metadata).await;

        assert!(matches!(result, Err(LedgerError::SchemaNotFound(_))));
    }

    #[tokio::test]
    async fn test_resubmitting_same_submission_id_is_duplicate() {
        let fx = fixture().await;
        let metadata = intake().with("submission_id", "sub-1");
        fx.submitter.submit(&json!({"name": "Ada"}), metadata.clone()).await.unwrap();

        let result = fx.submitter.submit(&json!({"name": "Ada"}), metadata).await;

        assert!(matches!(result, Err(LedgerError::DuplicateEvent(_))));
        assert_eq!(fx.events.len(), 1);
    }

    #[tokio::test]
    async fn test_json_encoding_is_recorded_per_event() {
        let fx = fixture().await;
        let submitter = fx.submitter.with_encoding(PayloadEncoding::Json);

        let id = submitter.submit(&json!({"name": "Ada"}), intake()).await.unwrap();

        let event = fx.events.get(id).await.unwrap().unwrap();
        assert_eq!(event.encoding(), PayloadEncoding::Json);
        assert_eq!(event.payload(), br#"{"name":"Ada"}"#);
    }
}
