//! Schema Registry service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use formledger_core::clock::Clock;
use formledger_core::error::LedgerError;
use formledger_core::repository::SchemaStore;
use formledger_core::schema::{AggregateSchema, Registration, SchemaCandidate, SchemaRef, SchemaVersion};

use crate::form::FormDefinition;
use crate::model::Schema;

/// Versioned, append-only registry of structural definitions.
///
/// Parsed schemas are cached by reference: a version's definition never
/// changes, so a cached entry never goes stale.
pub struct SchemaRegistry {
    store: Arc<dyn SchemaStore>,
    clock: Arc<dyn Clock>,
    parsed: Mutex<HashMap<SchemaRef, Arc<Schema>>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry").finish_non_exhaustive()
    }
}

fn check_name(kind: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::Configuration(format!("schema {kind} must not be empty")));
    }
    Ok(())
}

impl SchemaRegistry {
    /// Creates a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SchemaStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            parsed: Mutex::default(),
        }
    }

    /// Registers `definition` under `name` and `namespace`. A definition
    /// structurally identical to the latest version returns that version;
    /// anything else becomes `latest + 1`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the definition is malformed, `Infrastructure` on
    /// storage failure.
    pub async fn register(
        &self,
        name: &str,
        namespace: &str,
        definition: &Value,
    ) -> Result<Registration, LedgerError> {
        self.register_inner(name, namespace, definition, None).await
    }

    /// Registers `definition` and makes the result the active version for
    /// `aggregate_type` in the same transaction.
    ///
    /// # Errors
    ///
    /// As [`SchemaRegistry::register`].
    pub async fn register_for_aggregate(
        &self,
        aggregate_type: &str,
        name: &str,
        namespace: &str,
        definition: &Value,
    ) -> Result<Registration, LedgerError> {
        check_name("aggregate type", aggregate_type)?;
        self.register_inner(name, namespace, definition, Some(aggregate_type))
            .await
    }

    /// Generates the record schema for a form and registers it as the
    /// form's active version.
    ///
    /// # Errors
    ///
    /// `Configuration` if the form cannot be expressed as a schema.
    pub async fn publish_form(&self, form: &FormDefinition) -> Result<Registration, LedgerError> {
        let definition = form.to_definition()?;
        self.register_for_aggregate(&form.aggregate_type, &form.name, &form.namespace, &definition)
            .await
    }

    #[tracing::instrument(skip(self, definition))]
    async fn register_inner(
        &self,
        name: &str,
        namespace: &str,
        definition: &Value,
        aggregate_type: Option<&str>,
    ) -> Result<Registration, LedgerError> {
        check_name("name", name)?;
        check_name("namespace", namespace)?;
        let schema = Schema::parse(definition)?;

        let candidate = SchemaCandidate {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            definition: schema.to_value(),
            fingerprint: schema.fingerprint(),
            registered_at: self.clock.now(),
        };
        let registration = self.store.register(candidate, aggregate_type).await?;

        let schema_ref = registration.schema.schema_ref();
        if registration.created {
            tracing::info!(schema = %schema_ref, "schema version registered");
        } else {
            tracing::debug!(schema = %schema_ref, "definition unchanged, reusing version");
        }
        Ok(registration)
    }

    /// Loads one version. This is the export path for readers that decode
    /// raw event bytes themselves.
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` if the version does not exist.
    pub async fn get_schema(
        &self,
        name: &str,
        namespace: &str,
        version: i32,
    ) -> Result<SchemaVersion, LedgerError> {
        self.get(&SchemaRef::new(name, namespace, version)).await
    }

    /// Loads the version `schema_ref` names.
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` if the version does not exist.
    pub async fn get(&self, schema_ref: &SchemaRef) -> Result<SchemaVersion, LedgerError> {
        self.store
            .get(schema_ref)
            .await?
            .ok_or_else(|| LedgerError::schema_not_found(schema_ref))
    }

    /// Returns the parsed schema for `schema_ref`.
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` if the version does not exist.
    pub async fn resolve(&self, schema_ref: &SchemaRef) -> Result<Arc<Schema>, LedgerError> {
        if let Some(schema) = self.cached(schema_ref) {
            return Ok(schema);
        }
        let version = self.get(schema_ref).await?;
        let schema = Arc::new(Schema::parse(&version.definition)?);
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema_ref.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    fn cached(&self, schema_ref: &SchemaRef) -> Option<Arc<Schema>> {
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(schema_ref)
            .cloned()
    }

    /// Loads the newest version.
    ///
    /// # Errors
    ///
    /// `SchemaNotFound` if nothing is registered under the name.
    pub async fn latest(&self, name: &str, namespace: &str) -> Result<SchemaVersion, LedgerError> {
        self.store
            .latest(name, namespace)
            .await?
            .ok_or_else(|| LedgerError::SchemaNotFound(format!("{namespace}.{name}")))
    }

    /// Lists every version, oldest first.
    ///
    /// # Errors
    ///
    /// `Infrastructure` on storage failure.
    pub async fn versions(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<SchemaVersion>, LedgerError> {
        self.store.versions(name, namespace).await
    }

    /// The version submissions for `aggregate_type` are currently stamped with.
    ///
    /// # Errors
    ///
    /// `Infrastructure` on storage failure.
    pub async fn active_for(
        &self,
        aggregate_type: &str,
    ) -> Result<Option<AggregateSchema>, LedgerError> {
        self.store.active_for(aggregate_type).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use formledger_event_store::MemorySchemaStore;
    use formledger_test_support::FixedClock;
    use serde_json::json;

    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(
            Arc::new(MemorySchemaStore::new()),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())),
        )
    }

    fn v1() -> Value {
        json!({
            "type": "record", "name": "Nda", "doc": "first draft",
            "fields": [{"name": "full_name", "type": "string"}]
        })
    }

    fn v2() -> Value {
        json!({
            "type": "record", "name": "Nda",
            "fields": [
                {"name": "full_name", "type": "string"},
                {"name": "email", "type": ["null", "string"]}
            ]
        })
    }

    #[tokio::test]
    async fn test_identical_definition_reuses_version() {
        let registry = registry();

        let first = registry.register("Nda", "forms", &v1()).await.unwrap();
        let mut reworded = v1();
        reworded["doc"] = json!("second draft");
        let again = registry.register("Nda", "forms", &reworded).await.unwrap();

        assert!(first.created);
        assert!(!again.created);
        assert_eq!(again.schema.version, 1);
    }

    #[tokio::test]
    async fn test_changed_definition_appends_and_keeps_prior_version() {
        let registry = registry();
        let first = registry.register("Nda", "forms", &v1()).await.unwrap();

        let second = registry.register("Nda", "forms", &v2()).await.unwrap();
        let refetched = registry.get_schema("Nda", "forms", 1).await.unwrap();

        assert_eq!(second.schema.version, 2);
        assert_eq!(refetched, first.schema);
        assert_eq!(registry.latest("Nda", "forms").await.unwrap().version, 2);
        assert_eq!(registry.versions("Nda", "forms").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_version_is_schema_not_found() {
        let registry = registry();
        registry.register("Nda", "forms", &v1()).await.unwrap();

        let missing = registry.get_schema("Nda", "forms", 2).await;
        let unknown = registry.latest("Other", "forms").await;

        assert!(matches!(missing, Err(LedgerError::SchemaNotFound(_))));
        assert!(matches!(unknown, Err(LedgerError::SchemaNotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_definition_is_rejected_before_storage() {
        let registry = registry();

        let result = registry
            .register("Nda", "forms", &json!({"type": "record", "name": "Nda"}))
            .await;

        assert!(matches!(result, Err(LedgerError::Configuration(_))));
        assert!(registry.versions("Nda", "forms").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_for_aggregate_moves_active_version() {
        let registry = registry();

        registry
            .register_for_aggregate("nda", "Nda", "forms", &v1())
            .await
            .unwrap();
        let before = registry.active_for("nda").await.unwrap().unwrap();
        registry
            .register_for_aggregate("nda", "Nda", "forms", &v2())
            .await
            .unwrap();
        let after = registry.active_for("nda").await.unwrap().unwrap();

        assert_eq!(before.schema_ref, SchemaRef::new("Nda", "forms", 1));
        assert_eq!(after.schema_ref, SchemaRef::new("Nda", "forms", 2));
    }

    #[tokio::test]
    async fn test_resolve_returns_parsed_version() {
        let registry = registry();
        registry.register("Nda", "forms", &v1()).await.unwrap();
        let schema_ref = SchemaRef::new("Nda", "forms", 1);

        let first = registry.resolve(&schema_ref).await.unwrap();
        let second = registry.resolve(&schema_ref).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, Schema::parse(&v1()).unwrap());
    }
}
