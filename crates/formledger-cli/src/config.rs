//! Deployment configuration: `DATABASE_URL` from the environment, the rest
//! from a YAML file named by `FORMLEDGER_CONFIG` (default
//! `formledger.yaml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use formledger_core::event::PayloadEncoding;
use formledger_pipeline::{EventFilter, PipelineSettings};
use formledger_transform::FieldMapping;

use crate::error::CliError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FORMLEDGER_CONFIG";
/// Config file used when `FORMLEDGER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "formledger.yaml";

/// Processor variants that can be configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// Renders the field mapping for the event's aggregate type.
    Mapping,
    /// Writes the decoded submission and its metadata.
    Archive,
}

/// One configured processor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    pub id: String,
    pub kind: ProcessorKind,
    #[serde(default)]
    pub filter: EventFilter,
}

/// Everything the binary reads from its config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Root directory for output artifacts.
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub sink_timeout_ms: u64,
    /// Encoding `submit` writes.
    pub encoding: PayloadEncoding,
    /// Reject undeclared fields on submit.
    pub strict: bool,
    pub max_connections: u32,
    pub processors: Vec<ProcessorConfig>,
    pub mappings: Vec<FieldMapping>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            batch_size: 100,
            sink_timeout_ms: 30_000,
            encoding: PayloadEncoding::Binary,
            strict: true,
            max_connections: 10,
            processors: Vec::new(),
            mappings: Vec::new(),
        }
    }
}

impl LedgerConfig {
    /// Parses and checks a YAML document.
    ///
    /// # Errors
    ///
    /// `CliError::Yaml` on malformed YAML, `CliError::Config` on values out
    /// of range.
    pub fn from_yaml(source: &str, path: &str) -> Result<Self, CliError> {
        let config: Self = serde_yaml::from_str(source).map_err(|source| CliError::Yaml {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path`. A missing file yields the defaults unless
    /// `required` is set.
    ///
    /// # Errors
    ///
    /// As [`LedgerConfig::from_yaml`], plus `CliError::Io` on read failure.
    pub fn load(path: &Path, required: bool) -> Result<Self, CliError> {
        match std::fs::read_to_string(path) {
            Ok(source) => Self::from_yaml(&source, &path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(CliError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Loads the file named by `FORMLEDGER_CONFIG`, falling back to an
    /// optional `formledger.yaml`.
    ///
    /// # Errors
    ///
    /// As [`LedgerConfig::load`].
    pub fn from_env() -> Result<Self, CliError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(Path::new(&path), true),
            Err(_) => Self::load(Path::new(DEFAULT_CONFIG_PATH), false),
        }
    }

    fn validate(&self) -> Result<(), CliError> {
        if self.batch_size == 0 {
            return Err(CliError::Config("batch_size must be at least 1".into()));
        }
        if self.sink_timeout_ms == 0 {
            return Err(CliError::Config("sink_timeout_ms must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(CliError::Config("max_connections must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            batch_size: self.batch_size,
            sink_timeout: Duration::from_millis(self.sink_timeout_ms),
        }
    }
}

/// Reads `DATABASE_URL`.
///
/// # Errors
///
/// `CliError::Config` if it is unset.
pub fn database_url() -> Result<String, CliError> {
    std::env::var("DATABASE_URL")
        .map_err(|_| CliError::Config("DATABASE_URL environment variable must be set".into()))
}
