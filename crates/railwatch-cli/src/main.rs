use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use railwatch_pipeline::{provision_store, run_service_status, run_timetable, WatchConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONTEXT: &str = "Running locally.";

#[derive(Debug, Parser)]
#[command(name = "railwatch")]
#[command(about = "Transit service-alert watcher")]
struct Cli {
    /// YAML config file; environment variables apply otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll the service-alert feed once; notify on new relevant alerts.
    Alerts {
        /// Free-form invocation context, logged only.
        context: Option<String>,
    },
    /// Check the planned departures once; notify when the target is missing.
    Timetable {
        /// Free-form invocation context, logged only.
        context: Option<String>,
    },
    /// Create the alert table if it does not exist yet.
    Provision,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("railwatch=info")),
        )
        .init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => WatchConfig::from_yaml_file(path)?,
        None => WatchConfig::from_env(),
    };

    let report = match cli.command.unwrap_or(Commands::Alerts { context: None }) {
        Commands::Alerts { context } => {
            run_service_status(&config, context.as_deref().unwrap_or(DEFAULT_CONTEXT)).await?
        }
        Commands::Timetable { context } => {
            run_timetable(&config, context.as_deref().unwrap_or(DEFAULT_CONTEXT)).await?
        }
        Commands::Provision => {
            provision_store(&config).await?;
            println!("alert table ready");
            return Ok(ExitCode::SUCCESS);
        }
    };

    println!("{} ({})", report.message, report.status_code());
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
