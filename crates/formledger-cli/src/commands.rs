//! Command handlers. Each writes its human-readable result to `out`.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use formledger_core::event::{EventId, Metadata};
use formledger_pipeline::ConsumeOptions;
use formledger_schema::FormDefinition;

use crate::cli::{Commands, FormCommands, OffsetCommands, SchemaCommands};
use crate::error::CliError;
use crate::state::AppState;

fn read_json(path: &Path) -> Result<Value, CliError> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn read_form(path: &Path) -> Result<FormDefinition, CliError> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|source| CliError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

fn to_pretty(value: &Value) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|source| CliError::Json {
        path: "<output>".into(),
        source,
    })
}

/// Runs a command against `state`. Returns `false` when the command
/// completed but something it processed failed.
///
/// # Errors
///
/// Any error the command raises before it can report.
pub async fn execute(
    command: Commands,
    state: &AppState,
    out: &mut impl Write,
) -> Result<bool, CliError> {
    match command {
        Commands::ProcessEvents {
            processor_id,
            limit,
            interval_secs: None,
        } => process_events(state, processor_id.as_deref(), limit, out).await,
        Commands::ProcessEvents {
            processor_id,
            limit,
            interval_secs: Some(secs),
        } => {
            watch(state, processor_id.as_deref(), limit, Duration::from_secs(secs.max(1)), out)
                .await
        }
        Commands::Submit { file, meta } => submit(state, &file, meta, out).await.map(|()| true),
        Commands::Schema(command) => schema(state, command, out).await.map(|()| true),
        Commands::Forms(FormCommands::Publish { file }) => {
            publish_form(state, &file, out).await.map(|()| true)
        }
        Commands::Offsets(command) => offsets(state, command, out).await.map(|()| true),
        Commands::Migrate => Err(CliError::Config(
            "migrate runs against the database directly".into(),
        )),
    }
}

/// Runs one processor, or all of them, once.
///
/// # Errors
///
/// Errors that prevent a run from starting (unknown processor, storage).
pub async fn process_events(
    state: &AppState,
    processor_id: Option<&str>,
    limit: Option<usize>,
    out: &mut impl Write,
) -> Result<bool, CliError> {
    let ids = match processor_id {
        Some(id) => vec![id.to_owned()],
        None => state.pipeline.processor_ids(),
    };
    if ids.is_empty() {
        writeln!(out, "no processors configured")?;
        return Ok(true);
    }

    let mut clean = true;
    for id in ids {
        let report = state
            .pipeline
            .consume(&id, ConsumeOptions { limit })
            .await?;
        clean &= report.is_success();
        writeln!(out, "{}", report.summary())?;
    }
    Ok(clean)
}

/// Runs [`process_events`] every `interval` until interrupted. A failed run
/// is retried on the next tick.
async fn watch(
    state: &AppState,
    processor_id: Option<&str>,
    limit: Option<usize>,
    interval: Duration,
    out: &mut impl Write,
) -> Result<bool, CliError> {
    info!(interval_secs = interval.as_secs(), "scheduled processing started");
    loop {
        match process_events(state, processor_id, limit, out).await {
            Ok(true) => {}
            Ok(false) => warn!("run finished with a failed event, retrying next tick"),
            Err(e) => warn!(error = %e, "run could not start, retrying next tick"),
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("scheduled processing stopped");
                return Ok(true);
            }
            () = tokio::time::sleep(interval) => {}
        }
    }
}

async fn submit(
    state: &AppState,
    file: &Path,
    meta: Vec<(String, String)>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let payload = read_json(file)?;
    let metadata: Metadata = meta.into_iter().collect();
    let id = state.submitter.submit(&payload, metadata).await?;
    writeln!(out, "recorded event {id}")?;
    Ok(())
}

async fn schema(
    state: &AppState,
    command: SchemaCommands,
    out: &mut impl Write,
) -> Result<(), CliError> {
    match command {
        SchemaCommands::Get {
            name,
            namespace,
            version,
        } => {
            let schema = state.registry.get_schema(&name, &namespace, version).await?;
            writeln!(out, "{}", to_pretty(&schema.definition)?)?;
        }
        SchemaCommands::Register {
            name,
            namespace,
            file,
            aggregate_type,
        } => {
            let definition = read_json(&file)?;
            let registration = match aggregate_type {
                Some(aggregate_type) => {
                    state
                        .registry
                        .register_for_aggregate(&aggregate_type, &name, &namespace, &definition)
                        .await?
                }
                None => state.registry.register(&name, &namespace, &definition).await?,
            };
            let verb = if registration.created {
                "registered"
            } else {
                "unchanged"
            };
            writeln!(out, "{verb} {}", registration.schema.schema_ref())?;
        }
        SchemaCommands::List { name, namespace } => {
            for version in state.registry.versions(&name, &namespace).await? {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    version.version,
                    version.created_at.to_rfc3339(),
                    version.fingerprint
                )?;
            }
        }
    }
    Ok(())
}

async fn publish_form(state: &AppState, file: &Path, out: &mut impl Write) -> Result<(), CliError> {
    let form = read_form(file)?;
    let registration = state.registry.publish_form(&form).await?;
    writeln!(
        out,
        "{} now submits as {}",
        form.aggregate_type,
        registration.schema.schema_ref()
    )?;
    Ok(())
}

async fn offsets(
    state: &AppState,
    command: OffsetCommands,
    out: &mut impl Write,
) -> Result<(), CliError> {
    match command {
        OffsetCommands::List => {
            let latest = state.events.latest_id().await?;
            for offset in state.offsets.list().await? {
                let behind = state.events.count_after(offset.last_event_id).await?;
                let cursor = offset
                    .last_event_id
                    .map_or_else(|| "-".to_owned(), |id| id.to_string());
                writeln!(out, "{}\t{cursor}\t{behind} behind", offset.processor_id)?;
            }
            if let Some(latest) = latest {
                writeln!(out, "latest event {latest}")?;
            }
        }
        OffsetCommands::Skip {
            processor_id,
            event_id,
            reason,
            operator,
        } => {
            let record = state
                .pipeline
                .skip(&processor_id, EventId::new(event_id), &reason, &operator)
                .await?;
            writeln!(
                out,
                "{} skipped event {} (recorded by {})",
                record.processor_id, record.skipped_event_id, record.operator
            )?;
        }
    }
    Ok(())
}
