//! Formledger Transform — declarative templates over decoded submissions.
//!
//! Templates are compiled once: syntax errors, unknown filters and wrong
//! filter arity surface at compile time. Rendering is pure and fails with
//! `UndefinedVariable` rather than emitting empty text for a missing path.

pub mod ast;
pub mod context;
mod filters;
pub mod mapping;
mod parser;
pub mod template;

pub use context::event_context;
pub use mapping::{CompiledMapping, FieldMapping, MappingCatalog, MappingTemplate};
pub use template::Template;

/// Names of every filter templates may use.
#[must_use]
pub fn filter_names() -> Vec<&'static str> {
    let mut names: Vec<_> = filters::FILTERS.keys().copied().collect();
    names.sort_unstable();
    names
}
