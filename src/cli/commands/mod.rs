//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod init;
mod jobs;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};

#[derive(Parser)]
#[command(name = "chanstats")]
#[command(about = "Scheduled channel-statistics crawler")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the database
    #[arg(long, global = true, env = "CHANSTATS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// List known jobs and their schedules
    List,

    /// Run one job now
    Run {
        /// Job ID (see `list`)
        job_id: String,
        /// Print the full crawl report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run every enabled job once, one after another
    RunAll,

    /// Start the scheduler and block until Ctrl+C
    StartAll,

    /// Start the HTTP server with the scheduler running
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default from settings)
        bind: Option<String>,
        /// Serve the API without scheduling jobs
        #[arg(long)]
        no_schedule: bool,
    },

    /// Show the last run of every job
    Status,
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(LoadOptions {
        config_path: cli.config,
        data_dir: cli.data_dir,
    })
    .await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::List => jobs::cmd_list(&settings),
        Commands::Run { job_id, json } => jobs::cmd_run(&settings, &job_id, json).await,
        Commands::RunAll => jobs::cmd_run_all(&settings).await,
        Commands::StartAll => serve::cmd_start_all(&settings).await,
        Commands::Serve { bind, no_schedule } => {
            serve::cmd_serve(&settings, bind.as_deref(), !no_schedule).await
        }
        Commands::Status => status::cmd_status(&settings).await,
    }
}
