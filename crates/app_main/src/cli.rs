//! Command-line interface

use crate::http::HttpSource;
use crate::plan;
use anyhow::Context;
use app_core::{
    summarize, ActionEngine, AppConfig, AtomicStats, BatchOutcome, BatchReport, EngineError,
    FinalizeReport, Item, LoggingReporter,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Parser)]
#[command(name = "media_librarian", version, about = "Carry out a planned set of media library actions")]
pub struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(long, global = true, env = "MEDIA_LIBRARIAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute every action in a plan file
    Run(RunArgs),
    /// Show per-category totals of a plan file
    Summary {
        plan: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    plan: PathBuf,

    /// Concurrent downloads (overrides the configuration)
    #[arg(long)]
    parallel_downloads: Option<usize>,

    /// HTTP timeout in seconds
    #[arg(long, env = "MEDIA_LIBRARIAN_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AppConfig::config_path)
    }
}

/// Execute the parsed command. Returns the process exit code.
pub async fn dispatch(cli: Cli, config: AppConfig) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Run(args) => run(args, config).await,
        Command::Summary { plan } => summary(&plan),
    }
}

fn summary(path: &Path) -> anyhow::Result<ExitCode> {
    let items = plan::load(path)?;
    let summary = summarize(&items);
    print!("{}", summary);
    println!("{} items", summary.total_items());
    Ok(ExitCode::SUCCESS)
}

async fn run(args: RunArgs, mut config: AppConfig) -> anyhow::Result<ExitCode> {
    if let Some(parallel) = args.parallel_downloads {
        config.engine.parallel_downloads = parallel;
    }
    config.validate().context("invalid engine settings")?;

    let mut items = plan::load(&args.plan)?;
    print!("{}", summarize(&items));

    let stats = Arc::new(AtomicStats::new());
    let downloads = Arc::new(HttpSource::new(Duration::from_secs(args.timeout))?);
    let engine = ActionEngine::from_config(&config)
        .with_stats(stats.clone())
        .with_download_source(downloads);

    let handle = engine.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling batch");
            handle.cancel();
        }
    });

    let result = engine
        .do_actions(&mut items, Some(Arc::new(LoggingReporter)))
        .await;
    interrupt.abort();

    let code = exit_code(&result);
    let (report, finalized) = match result {
        Ok(done) => done,
        Err(e @ EngineError::BatchAborted(_)) => {
            eprintln!("error: {}", e);
            return Ok(code);
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "{} done, {} failed, {} not finished in {:.1}s ({})",
        report.succeeded,
        report.failed,
        finalized.pending,
        report.elapsed.as_secs_f64(),
        stats.snapshot()
    );
    for action in items.iter().filter_map(Item::as_action) {
        if let Some(text) = action.error_text() {
            println!("  FAILED {}: {}", action, text);
        }
    }

    Ok(code)
}

/// 0 when everything finished, 1 on cancellation or failed actions,
/// 2 when a scheduler fault aborted the batch
fn exit_code(result: &Result<(BatchReport, FinalizeReport), EngineError>) -> ExitCode {
    match result {
        Ok((report, finalized)) => {
            if report.outcome == BatchOutcome::Cancelled || finalized.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(EngineError::BatchAborted(_)) => ExitCode::from(2),
        Err(_) => ExitCode::FAILURE,
    }
}
