//! Formledger CLI — configuration, logging bootstrap and the commands of
//! the `formledger` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;

use std::io::Write;

use cli::{Cli, Commands};
use config::LedgerConfig;
use error::CliError;
use state::AppState;

/// Loads configuration, connects, and runs `cli.command`. Returns `false`
/// when the command completed but reported a failed event.
///
/// # Errors
///
/// Configuration, connection and command errors.
pub async fn run(cli: Cli, out: &mut impl Write) -> Result<bool, CliError> {
    let config = LedgerConfig::from_env()?;
    let database_url = config::database_url()?;
    let pool = state::connect(&config, &database_url).await?;

    if let Commands::Migrate = cli.command {
        formledger_event_store::schema::MIGRATOR.run(&pool).await?;
        writeln!(out, "migrations applied")?;
        return Ok(true);
    }

    let state = AppState::production(&config, &pool).await?;
    commands::execute(cli.command, &state, out).await
}
