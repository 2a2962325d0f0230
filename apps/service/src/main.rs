use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logger::LogFormat;
use tracing::{info, warn};

use pulse_service::config::Config;
use pulse_service::database::LibsqlStore;
use pulse_service::orchestrator::{Orchestrator, import_checks};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and worker pool (default)
    Run,
    /// Load check definitions from a TOML file into the store
    Import {
        /// File with one or more [[checks]] tables
        file: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dotenv = dotenvy::dotenv();

    let config = Config::load(args.config.as_ref()).context("failed to load configuration")?;

    let format = config.logging.format.parse::<LogFormat>().unwrap_or_default();
    logger::init_tracing(format);
    if let Err(e) = &dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env");
        }
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!(version = env!("CARGO_PKG_VERSION"), "starting pulse service");
            Orchestrator::new(config).await?.run().await
        }
        Command::Import { file } => {
            let store = LibsqlStore::open(&config.database.path).await.with_context(|| {
                format!("failed to open database {}", config.database.path.display())
            })?;
            let count = import_checks(&store, &file).await?;
            println!("imported {count} checks from {}", file.display());
            Ok(())
        }
        Command::Config => {
            println!("{config}");
            Ok(())
        }
    }
}
