//! Formledger Event Store — persistence for events, schemas and offsets.
//!
//! The `Pg*` stores are the production implementations over `sqlx`; the
//! `memory` module mirrors their semantics without a database.

pub mod cursor;
pub mod memory;
pub mod pg_event_store;
pub mod pg_offset_store;
pub mod pg_schema_store;
pub mod schema;

pub use memory::{MemoryEventStore, MemoryOffsetStore, MemorySchemaStore};
pub use pg_event_store::PgEventStore;
pub use pg_offset_store::PgOffsetStore;
pub use pg_schema_store::PgSchemaStore;
