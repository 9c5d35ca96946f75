//! gridschedd — the grid scheduler daemon.
//!
//! Runs the scheduler of one grid server:
//! - Loads `gridsched.toml`
//! - Restores the registry cache (redb)
//! - Applies JSON-lines events from a file or stdin
//! - Rebalances, expires stale peers and publishes status on a timer
//! - Prints one JSON outcome per event on stdout
//! - Saves the registry cache on shutdown
//!
//! # Usage
//!
//! ```text
//! gridschedd run --config /etc/gridsched.toml --cache /var/lib/gridsched/cache.redb < events.jsonl
//! ```

mod events;
mod node;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use gridsched_core::GridConfig;

const DEFAULT_FILTER: &str = "info,gridschedd=debug,gridsched=debug";

#[derive(Parser)]
#[command(name = "gridschedd", about = "Grid job scheduler daemon")]
struct Cli {
    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler for one grid server.
    Run {
        /// Path to the server configuration.
        #[arg(long, default_value = "gridsched.toml")]
        config: PathBuf,

        /// JSON-lines event stream. Reads stdin when omitted.
        #[arg(long)]
        events: Option<PathBuf>,

        /// Registry cache database. The cache is not persisted when omitted.
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Seconds between rebalance rounds.
        #[arg(long, default_value = "60")]
        tick: u64,
    },
    /// Parse and validate a configuration file, then print the effective
    /// settings.
    CheckConfig {
        #[arg(long, default_value = "gridsched.toml")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            events,
            cache,
            tick,
        } => {
            node::run_node(node::NodeOptions {
                config,
                events,
                cache,
                tick: Duration::from_secs(tick.max(1)),
            })
            .await
        }
        Command::CheckConfig { config } => {
            let config = GridConfig::from_file(&config)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
