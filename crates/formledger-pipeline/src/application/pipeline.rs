//! The `consume` loop.
//!
//! Per event: resolve the pinned schema, decode, process, write the
//! artifact, advance the cursor. The first failure stops the run with the
//! cursor on the last success. Writing the artifact and advancing the
//! cursor are separate steps, so a crash between them repeats the write on
//! the next run: delivery is at least once. The sink reports such repeats
//! as `WriteOutcome::Replaced`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use formledger_core::clock::Clock;
use formledger_core::error::LedgerError;
use formledger_core::event::{Event, EventId};
use formledger_core::offset::OffsetOverride;
use formledger_core::repository::{EventStore, OffsetStore};
use formledger_core::sink::{Artifact, OutputSink, WriteOutcome};
use formledger_schema::{SchemaRegistry, Serializer};

use crate::domain::processor::{Processor, ProcessorRegistry};
use crate::domain::report::{EventFailure, Phase, RunReport};
use crate::infrastructure::locks::ProcessorLocks;

/// Tuning shared by every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Events fetched per store query.
    pub batch_size: usize,
    /// Budget for one sink write.
    pub sink_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sink_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Stop after this many events have been looked at.
    pub limit: Option<usize>,
}

/// Everything a pipeline talks to.
pub struct PipelineDeps {
    pub events: Arc<dyn EventStore>,
    pub offsets: Arc<dyn OffsetStore>,
    pub registry: Arc<SchemaRegistry>,
    pub sink: Arc<dyn OutputSink>,
    pub clock: Arc<dyn Clock>,
    pub serializer: Serializer,
}

/// Runs processors over the event log, one locked run per processor at a
/// time.
pub struct Pipeline {
    deps: PipelineDeps,
    processors: ProcessorRegistry,
    settings: PipelineSettings,
    locks: ProcessorLocks,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("processors", &self.processors)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum Handled {
    Delivered(WriteOutcome),
    Filtered,
}

type Failed = (Phase, LedgerError);

fn at(phase: Phase) -> impl FnOnce(LedgerError) -> Failed {
    move |error| (phase, error)
}

fn first_after(cursor: Option<EventId>) -> EventId {
    cursor.map_or(EventId::new(1), EventId::next)
}

impl Pipeline {
    #[must_use]
    pub fn new(deps: PipelineDeps, processors: ProcessorRegistry, settings: PipelineSettings) -> Self {
        Self {
            deps,
            processors,
            settings,
            locks: ProcessorLocks::new(),
        }
    }

    /// Registered processor ids, sorted.
    #[must_use]
    pub fn processor_ids(&self) -> Vec<String> {
        self.processors.ids().map(str::to_owned).collect()
    }

    /// Processes the events after `processor_id`'s cursor, in order, until
    /// the log is exhausted, `options.limit` is reached or an event fails.
    ///
    /// A failing event is reported in [`RunReport::failure`], not as an
    /// `Err`; the next run starts again at that event.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unknown processor; storage errors raised
    /// while reading the cursor or fetching a batch.
    #[tracing::instrument(skip(self, options), fields(run_id = tracing::field::Empty))]
    pub async fn consume(
        &self,
        processor_id: &str,
        options: ConsumeOptions,
    ) -> Result<RunReport, LedgerError> {
        let processor = self.processors.get(processor_id)?;
        let _guard = self.locks.acquire(processor_id).await;

        let run_id = Uuid::now_v7();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let offset = self
            .deps
            .offsets
            .ensure(processor_id, self.deps.clock.now())
            .await?;
        let mut report = RunReport::new(run_id, processor_id, offset.last_event_id);
        info!(cursor = ?offset.last_event_id, "run started");

        let mut seen = 0usize;
        'run: loop {
            let budget = options.limit.map_or(self.settings.batch_size, |limit| {
                limit.saturating_sub(seen).min(self.settings.batch_size)
            });
            if budget == 0 {
                break;
            }
            let batch = self.deps.events.query(report.last_event_id, budget).await?;
            if batch.is_empty() {
                break;
            }

            for event in &batch {
                seen += 1;
                let expected = first_after(report.last_event_id);
                let handled = if event.id() == expected {
                    self.handle(processor.as_ref(), event, report.last_event_id).await
                } else {
                    Err((
                        Phase::Fetch,
                        LedgerError::Infrastructure(format!(
                            "expected event {expected}, store returned {}",
                            event.id()
                        )),
                    ))
                };

                match handled {
                    Ok(Handled::Delivered(outcome)) => {
                        report.processed_count += 1;
                        if outcome == WriteOutcome::Replaced {
                            report.replaced_artifacts += 1;
                        }
                    }
                    Ok(Handled::Filtered) => report.filtered_count += 1,
                    Err((phase, error)) => {
                        error!(event_id = %event.id(), %phase, error = %error, "event failed, stopping run");
                        report.failed_count = 1;
                        report.failure = Some(EventFailure {
                            processor_id: processor_id.to_owned(),
                            event_id: event.id(),
                            phase,
                            error,
                        });
                        break 'run;
                    }
                }
                report.last_event_id = Some(event.id());
            }
        }

        report.remaining_count = self.deps.events.count_after(report.last_event_id).await?;
        info!(
            processed = report.processed_count,
            filtered = report.filtered_count,
            failed = report.failed_count,
            remaining = report.remaining_count,
            "run finished"
        );
        Ok(report)
    }

    async fn handle(
        &self,
        processor: &dyn Processor,
        event: &Event,
        cursor: Option<EventId>,
    ) -> Result<Handled, Failed> {
        if !processor.accepts(event) {
            debug!(event_id = %event.id(), "event filtered out");
            self.advance(processor.id(), event.id()).await?;
            return Ok(Handled::Filtered);
        }

        let schema = self
            .deps
            .registry
            .resolve(event.schema_ref())
            .await
            .map_err(at(Phase::Schema))?;
        let data = self
            .deps
            .serializer
            .deserialize(&schema, event.payload(), event.encoding())
            .map_err(at(Phase::Decode))?;
        let body = processor.process(event, &data).map_err(at(Phase::Transform))?;

        let artifact = Artifact {
            processor_id: processor.id().to_owned(),
            event_id: event.id(),
            event_created_at: event.created_at(),
            body,
        };
        let outcome = tokio::time::timeout(
            self.settings.sink_timeout,
            self.deps.sink.write(&artifact, cursor),
        )
        .await
        .map_err(|_| {
            (
                Phase::Output,
                LedgerError::ProcessingTimeout {
                    event_id: event.id(),
                    timeout_ms: u64::try_from(self.settings.sink_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                },
            )
        })?
        .map_err(at(Phase::Output))?;

        self.advance(processor.id(), event.id()).await?;
        debug!(event_id = %event.id(), "event processed");
        Ok(Handled::Delivered(outcome))
    }

    async fn advance(&self, processor_id: &str, to: EventId) -> Result<(), Failed> {
        self.deps
            .offsets
            .advance(processor_id, to, self.deps.clock.now())
            .await
            .map(|_| ())
            .map_err(at(Phase::Advance))
    }

    /// Moves `processor_id`'s cursor past `event_id` without processing it,
    /// leaving an audit record. Only the event right after the cursor can be
    /// skipped.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unknown processor, an empty reason or
    /// operator, an event that is not next, or an event that does not exist.
    #[tracing::instrument(skip(self, reason, operator), fields(event_id = %event_id))]
    pub async fn skip(
        &self,
        processor_id: &str,
        event_id: EventId,
        reason: &str,
        operator: &str,
    ) -> Result<OffsetOverride, LedgerError> {
        self.processors.get(processor_id)?;
        if reason.trim().is_empty() || operator.trim().is_empty() {
            return Err(LedgerError::Configuration(
                "a skip needs a reason and an operator".into(),
            ));
        }
        let _guard = self.locks.acquire(processor_id).await;

        let now = self.deps.clock.now();
        let offset = self.deps.offsets.ensure(processor_id, now).await?;
        let next = first_after(offset.last_event_id);
        if event_id != next {
            return Err(LedgerError::Configuration(format!(
                "processor '{processor_id}' can only skip event {next}, not {event_id}"
            )));
        }
        if self.deps.events.get(event_id).await?.is_none() {
            return Err(LedgerError::Configuration(format!(
                "event {event_id} does not exist"
            )));
        }

        let record = OffsetOverride {
            processor_id: processor_id.to_owned(),
            skipped_event_id: event_id,
            previous_event_id: offset.last_event_id,
            reason: reason.to_owned(),
            operator: operator.to_owned(),
            recorded_at: now,
        };
        self.deps.offsets.record_skip(record.clone()).await?;
        warn!(%operator, %reason, "event skipped by operator");
        Ok(record)
    }
}
