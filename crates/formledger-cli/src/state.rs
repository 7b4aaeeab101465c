//! Shared application state: stores, registry, submitter and pipeline
//! wired from one `LedgerConfig`.

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use formledger_core::clock::{Clock, SystemClock};
use formledger_core::repository::{EventStore, OffsetStore, SchemaStore};
use formledger_core::sink::OutputSink;
use formledger_event_store::{PgEventStore, PgOffsetStore, PgSchemaStore};
use formledger_pipeline::{
    ArchiveProcessor, FileSink, MappingProcessor, Pipeline, PipelineDeps, Processor,
    ProcessorRegistry, Submitter,
};
use formledger_schema::{SchemaRegistry, Serializer};
use formledger_transform::MappingCatalog;

use crate::config::{LedgerConfig, ProcessorKind};
use crate::error::CliError;

/// The three stores the ledger persists to.
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub offsets: Arc<dyn OffsetStore>,
    pub schemas: Arc<dyn SchemaStore>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing `pool`.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            events: Arc::new(PgEventStore::new(pool.clone())),
            offsets: Arc::new(PgOffsetStore::new(pool.clone())),
            schemas: Arc::new(PgSchemaStore::new(pool.clone())),
        }
    }
}

/// Application state shared by every command.
pub struct AppState {
    pub registry: Arc<SchemaRegistry>,
    pub events: Arc<dyn EventStore>,
    pub offsets: Arc<dyn OffsetStore>,
    pub submitter: Submitter,
    pub pipeline: Pipeline,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires state over `stores`, writing artifacts to `sink`.
    ///
    /// # Errors
    ///
    /// `CliError::Ledger` if a mapping fails to compile, names an unknown
    /// target schema, or a processor is configured twice.
    pub async fn build(
        config: &LedgerConfig,
        stores: Stores,
        sink: Arc<dyn OutputSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CliError> {
        let registry = Arc::new(SchemaRegistry::new(stores.schemas, Arc::clone(&clock)));
        let catalog = Arc::new(MappingCatalog::build(config.mappings.clone(), &registry).await?);

        let mut processors = ProcessorRegistry::new();
        for processor in &config.processors {
            let built: Arc<dyn Processor> = match processor.kind {
                ProcessorKind::Mapping => Arc::new(MappingProcessor::new(
                    processor.id.clone(),
                    processor.filter.clone(),
                    Arc::clone(&catalog),
                )),
                ProcessorKind::Archive => Arc::new(ArchiveProcessor::new(
                    processor.id.clone(),
                    processor.filter.clone(),
                )),
            };
            processors.register(built)?;
        }

        let serializer = Serializer::new(config.strict);
        let submitter = Submitter::new(
            Arc::clone(&registry),
            Arc::clone(&stores.events),
            Arc::clone(&clock),
        )
        .with_serializer(serializer)
        .with_encoding(config.encoding);
        let pipeline = Pipeline::new(
            PipelineDeps {
                events: Arc::clone(&stores.events),
                offsets: Arc::clone(&stores.offsets),
                registry: Arc::clone(&registry),
                sink,
                clock,
                serializer,
            },
            processors,
            config.pipeline_settings(),
        );
        tracing::info!(
            processors = config.processors.len(),
            mappings = catalog.len(),
            "ledger ready"
        );

        Ok(Self {
            registry,
            events: stores.events,
            offsets: stores.offsets,
            submitter,
            pipeline,
        })
    }

    /// Production wiring: PostgreSQL stores, a file sink under
    /// `config.output_dir` and the system clock.
    ///
    /// # Errors
    ///
    /// As [`AppState::build`].
    pub async fn production(config: &LedgerConfig, pool: &PgPool) -> Result<Self, CliError> {
        Self::build(
            config,
            Stores::postgres(pool),
            Arc::new(FileSink::new(config.output_dir.clone())),
            Arc::new(SystemClock),
        )
        .await
    }
}

/// Opens the connection pool.
///
/// # Errors
///
/// `CliError::Database` if the database is unreachable.
pub async fn connect(config: &LedgerConfig, database_url: &str) -> Result<PgPool, CliError> {
    Ok(PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await?)
}
