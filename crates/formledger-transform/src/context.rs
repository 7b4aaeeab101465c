//! Rendering context built from a stored event.

use chrono::SecondsFormat;
use serde_json::{Value, json};

use formledger_core::event::Event;

/// Builds `{"data": …, "event": {"id", "created_at", "metadata", "schema"}}`
/// for `event` and its decoded payload.
#[must_use]
pub fn event_context(event: &Event, data: Value) -> Value {
    let schema = event.schema_ref();
    json!({
        "data": data,
        "event": {
            "id": event.id().get(),
            "created_at": event.created_at().to_rfc3339_opts(SecondsFormat::Micros, true),
            "metadata": event.metadata().as_map(),
            "schema": {
                "name": schema.name,
                "namespace": schema.namespace,
                "version": schema.version,
            },
        },
    })
}
