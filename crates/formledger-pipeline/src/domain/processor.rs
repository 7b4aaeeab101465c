//! Processors: named, stateless transformations of one decoded event into
//! one output document.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use formledger_core::error::LedgerError;
use formledger_core::event::Event;
use formledger_transform::{MappingCatalog, event_context};

/// A processing capability, registered under a stable id.
pub trait Processor: Send + Sync {
    /// Stable id. Offsets, locks and output directories are keyed by it.
    fn id(&self) -> &str;

    /// Whether this processor wants `event`. Rejected events are still
    /// consumed in order; the cursor moves past them without output.
    fn accepts(&self, _event: &Event) -> bool {
        true
    }

    /// Turns an event and its decoded payload into the output document.
    ///
    /// # Errors
    ///
    /// Any error stops the run at this event.
    fn process(&self, event: &Event, data: &Value) -> Result<Value, LedgerError>;
}

/// Metadata conditions an event must meet to reach a processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub aggregate_type: Option<String>,
}

impl EventFilter {
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let metadata = event.metadata();
        self.source
            .as_deref()
            .is_none_or(|source| metadata.source() == Some(source))
            && self
                .aggregate_type
                .as_deref()
                .is_none_or(|aggregate| metadata.aggregate_type() == Some(aggregate))
    }
}

/// Renders the field mapping configured for the event's aggregate type.
#[derive(Debug)]
pub struct MappingProcessor {
    id: String,
    filter: EventFilter,
    catalog: Arc<MappingCatalog>,
}

impl MappingProcessor {
    #[must_use]
    pub fn new(id: impl Into<String>, filter: EventFilter, catalog: Arc<MappingCatalog>) -> Self {
        Self {
            id: id.into(),
            filter,
            catalog,
        }
    }
}

impl Processor for MappingProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn accepts(&self, event: &Event) -> bool {
        self.filter.matches(event)
    }

    fn process(&self, event: &Event, data: &Value) -> Result<Value, LedgerError> {
        let aggregate_type = event.metadata().aggregate_type().ok_or_else(|| {
            LedgerError::Configuration(format!("event {} has no aggregate_type", event.id()))
        })?;
        let mapping = self.catalog.for_aggregate(aggregate_type).ok_or_else(|| {
            LedgerError::Configuration(format!(
                "processor '{}' has no mapping for aggregate type '{aggregate_type}'",
                self.id
            ))
        })?;
        mapping.render(&event_context(event, data.clone()))
    }
}

/// Writes the decoded submission alongside its metadata, unchanged.
#[derive(Debug)]
pub struct ArchiveProcessor {
    id: String,
    filter: EventFilter,
}

impl ArchiveProcessor {
    #[must_use]
    pub fn new(id: impl Into<String>, filter: EventFilter) -> Self {
        Self {
            id: id.into(),
            filter,
        }
    }
}

impl Processor for ArchiveProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn accepts(&self, event: &Event) -> bool {
        self.filter.matches(event)
    }

    fn process(&self, event: &Event, data: &Value) -> Result<Value, LedgerError> {
        Ok(json!({
            "event_id": event.id(),
            "schema": event.schema_ref(),
            "metadata": event.metadata(),
            "data": data,
        }))
    }
}

/// Explicit table of processors keyed by id.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn Processor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("ids", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProcessorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `processor`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the id is empty or already taken.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> Result<(), LedgerError> {
        let id = processor.id().to_owned();
        if id.trim().is_empty() {
            return Err(LedgerError::Configuration("processor id must not be empty".into()));
        }
        if self.processors.contains_key(&id) {
            return Err(LedgerError::Configuration(format!(
                "processor '{id}' is registered twice"
            )));
        }
        self.processors.insert(id, processor);
        Ok(())
    }

    /// Looks up a processor.
    ///
    /// # Errors
    ///
    /// `Configuration` if no processor has that id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Processor>, LedgerError> {
        self.processors
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::Configuration(format!("unknown processor '{id}'")))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use formledger_core::event::{EventId, Metadata, NewEvent, PayloadEncoding};
    use formledger_core::schema::SchemaRef;

    use super::*;

    fn event(metadata: Metadata) -> Event {
        Event::stored(
            EventId::new(3),
            NewEvent {
                payload: Vec::new(),
                encoding: PayloadEncoding::Json,
                schema_ref: SchemaRef::new("Intake", "forms", 1),
                metadata,
                created_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
            },
        )
    }

    #[test]
    fn test_filter_matches_on_every_configured_key() {
        let filter = EventFilter {
            source: Some("questionnaire".into()),
            aggregate_type: Some("intake".into()),
        };

        assert!(filter.matches(&event(
            Metadata::new()
                .with("source", "questionnaire")
                .with("aggregate_type", "intake")
        )));
        assert!(!filter.matches(&event(Metadata::new().with("source", "questionnaire"))));
        assert!(EventFilter::default().matches(&event(Metadata::new())));
    }

    #[test]
    fn test_archive_keeps_data_and_metadata() {
        let processor = ArchiveProcessor::new("archive", EventFilter::default());
        let event = event(Metadata::new().with("source", "web"));

        let output = processor.process(&event, &json!({"name": "Ada"})).unwrap();

        assert_eq!(output["event_id"], json!(3));
        assert_eq!(output["metadata"]["source"], json!("web"));
        assert_eq!(output["schema"]["version"], json!(1));
        assert_eq!(output["data"], json!({"name": "Ada"}));
    }

    #[test]
    fn test_mapping_processor_without_mapping_is_configuration_error() {
        let processor = MappingProcessor::new(
            "w9",
            EventFilter::default(),
            Arc::new(MappingCatalog::default()),
        );
        let event = event(Metadata::new().with("aggregate_type", "payroll"));

        let result = processor.process(&event, &json!({}));

        assert!(matches!(result, Err(LedgerError::Configuration(m)) if m.contains("payroll")));
    }

    #[test]
    fn test_registry_rejects_duplicates_and_unknown_ids() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register(Arc::new(ArchiveProcessor::new("archive", EventFilter::default())))
            .unwrap();

        let duplicate =
            registry.register(Arc::new(ArchiveProcessor::new("archive", EventFilter::default())));

        assert!(matches!(duplicate, Err(LedgerError::Configuration(_))));
        assert!(matches!(registry.get("nope"), Err(LedgerError::Configuration(_))));
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["archive"]);
    }
}
