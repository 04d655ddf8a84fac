use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use railstatus_common::{Config, FileConfig, Secrets};
use railstatus_scout::pipeline::{Pipeline, RunOutcome};

#[derive(Parser)]
#[command(name = "railstatus")]
#[command(about = "Scrape the rail network status page, enrich incidents, publish a snapshot")]
#[command(version)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long, global = true, env = "RAILSTATUS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Scrape, merge, enrich and publish (default)
    Run,
    /// Regenerate the snapshot from stored history only
    Publish,
}

// Client crates only log request details at debug.
fn log_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("railstatus=info".parse()?)
        .add_directive("ai_client=warn".parse()?)
        .add_directive("browserless_client=warn".parse()?))
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = log_filter()?;
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn execute(cli: &Cli) -> Result<bool> {
    let file = FileConfig::load_or_default(cli.config.as_deref())?;
    let config = Config::new(file, Secrets::from_env());
    config.log_redacted();

    let pipeline = Pipeline::from_config(&config)?;
    let now = Utc::now();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => match pipeline.run(now).await? {
            RunOutcome::Completed(stats) => {
                info!("{stats}");
                Ok(true)
            }
            RunOutcome::NoItems => {
                error!("No incidents fetched, nothing published");
                Ok(false)
            }
        },
        Command::Publish => {
            let stats = pipeline.publish_only(now)?;
            info!(published = stats.published, total = stats.total_incidents, "Snapshot regenerated");
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.json_logs) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    info!("Rail status scout starting...");

    match execute(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Run failed");
            ExitCode::from(1)
        }
    }
}
