//! Schema version records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one immutable schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    /// Schema name.
    pub name: String,
    /// Schema namespace.
    pub namespace: String,
    /// Version number, starting at 1.
    pub version: i32,
}

impl SchemaRef {
    /// Creates a new reference.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version,
        }
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} v{}", self.namespace, self.name, self.version)
    }
}

/// A stored schema version. The definition never changes once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Schema name.
    pub name: String,
    /// Schema namespace.
    pub namespace: String,
    /// Version number.
    pub version: i32,
    /// Canonical structural definition.
    pub definition: serde_json::Value,
    /// Hex SHA-256 of the canonical definition.
    pub fingerprint: String,
    /// When this version was registered.
    pub created_at: DateTime<Utc>,
}

impl SchemaVersion {
    /// Returns the reference that names this version.
    #[must_use]
    pub fn schema_ref(&self) -> SchemaRef {
        SchemaRef::new(&self.name, &self.namespace, self.version)
    }
}

/// A definition offered to a schema store for registration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCandidate {
    /// Schema name.
    pub name: String,
    /// Schema namespace.
    pub namespace: String,
    /// Canonical structural definition.
    pub definition: serde_json::Value,
    /// Hex SHA-256 of `definition`.
    pub fingerprint: String,
    /// Registration timestamp used if a new version is written.
    pub registered_at: DateTime<Utc>,
}

/// Result of a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// The version now current for the name and namespace.
    pub schema: SchemaVersion,
    /// `false` when the definition matched the latest version and nothing was written.
    pub created: bool,
}

/// The schema version currently active for an aggregate type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSchema {
    /// Aggregate type the binding applies to.
    pub aggregate_type: String,
    /// Active schema version.
    pub schema_ref: SchemaRef,
    /// When the binding last moved.
    pub updated_at: DateTime<Utc>,
}
