//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod extract;
mod queries;
mod run;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "pricewatch")]
#[command(about = "Daily marketplace price tracker")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "PRICEWATCH_CONFIG")]
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
    /// Run today's batch over all configured queries
    Run {
        /// Fetch static HTML instead of driving a browser
        #[arg(long)]
        http: bool,
        /// CSV file to append to (overrides output_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Add Min/Max/Count columns
        #[arg(long)]
        extended: bool,
        /// Discard today's progress and start over
        #[arg(long)]
        fresh: bool,
    },

    /// Run the extraction pipeline over a saved search page
    Extract {
        /// Saved HTML page
        html_file: PathBuf,
        /// Lowest accepted price (defaults to config)
        #[arg(long)]
        min: Option<i64>,
        /// Highest accepted price (defaults to config)
        #[arg(long)]
        max: Option<i64>,
    },

    /// Manage batch state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },

    /// List configured queries
    Queries,
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show today's progress
    Show,
    /// Delete the state file
    Reset {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).await?;
    config.validate()?;
    if let Some(path) = &config.source_path {
        tracing::debug!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Run {
            http,
            output,
            extended,
            fresh,
        } => {
            let options = run::RunOptions {
                http,
                output,
                extended,
                fresh,
            };
            run::cmd_run(&config, options).await
        }
        Commands::Extract {
            html_file,
            min,
            max,
        } => extract::cmd_extract(&config, &html_file, min, max).await,
        Commands::State { command } => match command {
            StateCommands::Show => state::cmd_state_show(&config).await,
            StateCommands::Reset { confirm } => state::cmd_state_reset(&config, confirm).await,
        },
        Commands::Queries => queries::cmd_queries(&config),
    }
}
