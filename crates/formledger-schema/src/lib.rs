//! Formledger Schema — versioned structural schemas and the payload codec.
//!
//! [`SchemaRegistry`] stores definitions append-only and deduplicates them by
//! structural fingerprint; [`Serializer`] validates submissions against one
//! version and encodes them so they stay decodable after the form evolves.

pub mod codec;
pub mod form;
pub mod model;
pub mod registry;

pub use codec::Serializer;
pub use form::{FormDefinition, Question, QuestionKind};
pub use model::{Schema, Shape};
pub use registry::SchemaRegistry;
