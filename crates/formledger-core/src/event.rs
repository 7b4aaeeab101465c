//! Submission events.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::schema::SchemaRef;

/// Metadata key naming the system that produced the event.
pub const META_SOURCE: &str = "source";
/// Metadata key naming the aggregate instance the submission belongs to.
pub const META_AGGREGATE_ID: &str = "aggregate_id";
/// Metadata key naming the aggregate type, which selects the active schema.
pub const META_AGGREGATE_TYPE: &str = "aggregate_type";
/// Metadata key carrying the producer's submission identifier.
pub const META_SUBMISSION_ID: &str = "submission_id";

/// Store-assigned event sequence number. Gapless and strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Wraps a raw sequence number.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns the id immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How an event's payload bytes are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Compact schema-driven binary encoding.
    #[default]
    Binary,
    /// Validated JSON document.
    Json,
}

impl PayloadEncoding {
    /// Storage label for the encoding.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Json => "json",
        }
    }
}

impl FromStr for PayloadEncoding {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(Self::Binary),
            "json" => Ok(Self::Json),
            other => Err(LedgerError::Configuration(format!(
                "unknown payload encoding '{other}'"
            ))),
        }
    }
}

/// String-to-string metadata attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The producing system, if recorded.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.get(META_SOURCE)
    }

    /// The aggregate type, if recorded.
    #[must_use]
    pub fn aggregate_type(&self) -> Option<&str> {
        self.get(META_AGGREGATE_TYPE)
    }

    /// The aggregate instance id, if recorded.
    #[must_use]
    pub fn aggregate_id(&self) -> Option<&str> {
        self.get(META_AGGREGATE_ID)
    }

    /// The producer's submission id, if recorded.
    #[must_use]
    pub fn submission_id(&self) -> Option<&str> {
        self.get(META_SUBMISSION_ID)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// An event waiting to be appended. It has no id: ids are always assigned by
/// the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Encoded payload.
    pub payload: Vec<u8>,
    /// Encoding used for `payload`.
    pub encoding: PayloadEncoding,
    /// Schema version the payload was encoded with.
    pub schema_ref: SchemaRef,
    /// Event metadata.
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A stored event. There are no setters: once constructed, nothing about it
/// can change.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    payload: Vec<u8>,
    encoding: PayloadEncoding,
    schema_ref: SchemaRef,
    metadata: Metadata,
    created_at: DateTime<Utc>,
}

impl Event {
    /// Materializes a stored event. Only event stores call this, once the id
    /// has been assigned.
    #[must_use]
    pub fn stored(id: EventId, new: NewEvent) -> Self {
        Self {
            id,
            payload: new.payload,
            encoding: new.encoding,
            schema_ref: new.schema_ref,
            metadata: new.metadata,
            created_at: new.created_at,
        }
    }

    /// The event's sequence number.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// The encoded payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encoding of the payload.
    #[must_use]
    pub fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    /// The schema version that decodes the payload.
    #[must_use]
    pub fn schema_ref(&self) -> &SchemaRef {
        &self.schema_ref
    }

    /// Event metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
