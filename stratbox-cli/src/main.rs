//! stratbox — validate and run sandboxed trading strategies from the
//! command line.
//!
//! Output is JSON on stdout; logs go to stderr and are controlled with
//! `RUST_LOG` (e.g. `RUST_LOG=stratbox=debug`).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stratbox_runner::data_loader::load_bars_csv;
use stratbox_runner::{ExecutionService, ServiceConfig, StrategyRunRequest};

#[derive(Parser)]
#[command(name = "stratbox", version, about)]
struct Cli {
    /// TOML config file; without it, defaults plus STRATBOX_* overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a strategy script without executing it.
    Validate {
        script: PathBuf,
        #[arg(long, default_value = "rhai")]
        language: String,
    },
    /// Execute a strategy against CSV bars and backtest its signals.
    Run {
        script: PathBuf,
        /// CSV with header timestamp,open,high,low,close,volume.
        #[arg(long)]
        bars: PathBuf,
        #[arg(long, default_value = "rhai")]
        language: String,
        /// Seconds; 0 uses the configured default.
        #[arg(long, default_value_t = 0)]
        timeout: u64,
        #[arg(long)]
        strategy_id: Option<String>,
    },
    /// Print service health and limits.
    Health,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServiceConfig::from_env().context("reading STRATBOX_* environment")?,
    };
    let service = ExecutionService::new(config).context("starting execution service")?;

    match cli.command {
        Command::Validate { script, language } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let report = service.validate_code(&source, &language);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(exit_flag(report.valid))
        }
        Command::Run {
            script,
            bars,
            language,
            timeout,
            strategy_id,
        } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let bars = load_bars_csv(&bars)
                .with_context(|| format!("loading bars from {}", bars.display()))?;

            let outcome = service.execute_strategy(&StrategyRunRequest {
                source,
                language,
                bars,
                timeout_seconds: timeout,
                user_id: None,
                strategy_id,
            });
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(exit_flag(outcome.success))
        }
        Command::Health => {
            println!("{}", serde_json::to_string_pretty(&service.health())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_flag(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
