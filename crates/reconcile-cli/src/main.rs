use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;

#[derive(Parser)]
#[command(name = "runner-reconcile")]
#[command(about = "Register declared runner executors and render the runner config", long_about = None)]
struct Cli {
    /// Configuration prefix holding config.template and executors/
    #[arg(long, global = true, default_value = reconcile_core::config::DEFAULT_PREFIX)]
    prefix: PathBuf,

    /// Query the service for known runners instead of runner-data.json
    #[arg(long, global = true)]
    stateless: bool,

    /// Hostname used for descriptions and host tags
    #[arg(long, global = true)]
    hostname: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    /// Attempts per remote call
    #[arg(long, global = true, default_value = "3")]
    max_attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile executors and write config.toml
    Configure,

    /// Show what configure would register, delete and keep
    Plan {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List declared executors
    Executors {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List persisted credentials
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = dispatch::Options {
        prefix: cli.prefix,
        stateless: cli.stateless,
        hostname: cli.hostname,
        timeout_secs: cli.timeout_secs,
        max_attempts: cli.max_attempts,
    };

    use Commands::*;

    match cli.command {
        Configure => commands::configure(&options).await?,
        Plan { json } => commands::plan(&options, json).await?,
        Executors { json } => commands::executors(&options, json).await?,
        Status { json } => commands::status(&options, json).await?,
    }

    Ok(())
}
