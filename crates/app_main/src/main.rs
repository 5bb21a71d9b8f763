//! MediaLibrarian - carries out planned media library actions
//!
//! Main entry point for the command-line application.

mod cli;
mod http;
mod plan;

use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging and panic hook first
    let _log = match app_log::init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let cli = cli::Cli::parse();
    tracing::info!("MediaLibrarian starting...");

    let config = match app_core::AppConfig::load_from(&cli.config_path()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {:#}", e);
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app_log::cleanup_old_logs(config.logging.keep_days) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    match cli::dispatch(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
