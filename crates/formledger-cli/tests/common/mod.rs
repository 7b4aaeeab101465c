//! Shared helpers for command integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use formledger_cli::cli::Commands;
use formledger_cli::commands;
use formledger_cli::config::LedgerConfig;
use formledger_cli::error::CliError;
use formledger_cli::state::{AppState, Stores};
use formledger_core::clock::Clock;
use formledger_event_store::{MemoryEventStore, MemoryOffsetStore, MemorySchemaStore};
use formledger_test_support::{FixedClock, RecordingSink};

/// Fixed timestamp used across all command tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()))
}

/// In-memory stores with the schema foreign key enforced.
pub fn memory_stores() -> Stores {
    let schemas = Arc::new(MemorySchemaStore::new());
    Stores {
        events: Arc::new(MemoryEventStore::with_schemas(schemas.clone())),
        offsets: Arc::new(MemoryOffsetStore::new()),
        schemas,
    }
}

/// Builds state over memory stores, returning the sink artifacts land in.
pub async fn build_state(yaml: &str) -> (AppState, Arc<RecordingSink>) {
    let config = LedgerConfig::from_yaml(yaml, "test.yaml").unwrap();
    let sink = Arc::new(RecordingSink::new());
    let state = AppState::build(&config, memory_stores(), sink.clone(), fixed_clock())
        .await
        .unwrap();
    (state, sink)
}

/// Runs a command and returns its outcome and everything it printed.
pub async fn run(state: &AppState, command: Commands) -> (Result<bool, CliError>, String) {
    let mut out = Vec::new();
    let result = commands::execute(command, state, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

/// Writes `contents` to `name` inside `dir`.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
