//! Formledger Pipeline — submission ingress and ordered, fail-stop
//! processing of the event log.
//!
//! Each processor consumes the log through its own cursor. Runs for one
//! processor are serialized by a lock; different processors are
//! independent. Delivery to the output sink is at least once.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::pipeline::{ConsumeOptions, Pipeline, PipelineDeps, PipelineSettings};
pub use application::submit::Submitter;
pub use domain::processor::{
    ArchiveProcessor, EventFilter, MappingProcessor, Processor, ProcessorRegistry,
};
pub use domain::report::{EventFailure, Phase, RunReport};
pub use infrastructure::file_sink::FileSink;
pub use infrastructure::locks::ProcessorLocks;
