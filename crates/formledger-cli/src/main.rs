//! Formledger command-line entry point.

use std::process::ExitCode;

use clap::Parser;

use formledger_cli::cli::Cli;
use formledger_cli::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let telemetry = match telemetry::init(level) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("formledger: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = std::io::stdout().lock();
    let code = match formledger_cli::run(cli, &mut stdout).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "command failed");
            eprintln!("formledger: {e}");
            ExitCode::FAILURE
        }
    };

    telemetry.shutdown();
    code
}
