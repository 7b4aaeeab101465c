//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Formledger: append-only form submission ledger.
#[derive(Debug, Parser)]
#[command(name = "formledger")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run processors over events recorded since their last run
    ProcessEvents {
        /// Processor to run; every configured processor when omitted
        processor_id: Option<String>,

        /// Look at no more than this many events per processor
        #[arg(long)]
        limit: Option<usize>,

        /// Keep running, once every this many seconds, until interrupted
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Record a finalized submission
    Submit {
        /// JSON payload file
        #[arg(short, long)]
        file: PathBuf,

        /// Metadata entry; must include aggregate_type
        #[arg(short, long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Schema registry commands
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// Form definition commands
    #[command(subcommand)]
    Forms(FormCommands),

    /// Processor offset commands
    #[command(subcommand)]
    Offsets(OffsetCommands),

    /// Apply pending database migrations
    Migrate,
}

#[derive(Debug, Subcommand)]
pub enum SchemaCommands {
    /// Print one version's definition
    Get {
        name: String,
        namespace: String,
        version: i32,
    },

    /// Register a definition, printing the resulting version
    Register {
        name: String,
        namespace: String,

        /// JSON definition file
        #[arg(short, long)]
        file: PathBuf,

        /// Also make this the active schema for an aggregate type
        #[arg(long)]
        aggregate_type: Option<String>,
    },

    /// List every version of a schema
    List { name: String, namespace: String },
}

#[derive(Debug, Subcommand)]
pub enum FormCommands {
    /// Generate and register the schema for a YAML form definition
    Publish {
        /// YAML form definition file
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum OffsetCommands {
    /// Show every processor's cursor
    List,

    /// Move a processor past the event right after its cursor, unprocessed
    Skip {
        processor_id: String,
        event_id: i64,

        /// Why the event is skipped
        #[arg(long)]
        reason: String,

        /// Who is skipping it
        #[arg(long)]
        operator: String,
    },
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
