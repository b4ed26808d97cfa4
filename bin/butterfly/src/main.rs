mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "butterfly")]
#[command(about = "Client-side web policy enforcement agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize butterfly configuration and storage
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show configuration, credential, policy and today's usage
    Status,

    /// Manage the supervising-group hash key
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Classify a URL against the cached policy and today's usage
    Check {
        /// Destination URL
        url: String,
    },

    /// Show per-domain usage for a day
    Usage {
        /// Day as YYYY-MM-DD (defaults to today)
        #[arg(long)]
        day: Option<String>,
    },

    /// Fetch the policy from the authority once
    Refresh,

    /// Run the agent, reading host events from stdin and writing commands to stdout
    Run {
        /// Never contact the authority; enforce the cached policy only
        #[arg(long)]
        offline: bool,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Store a new hash key
    Set {
        /// 5-character key issued by the supervisor
        key: String,
    },
    /// Print the stored hash key
    Show,
    /// Remove the stored hash key
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries host commands in `run`; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Key { command } => match command {
            KeyCommands::Set { key } => commands::key::set(&key).await?,
            KeyCommands::Show => commands::key::show().await?,
            KeyCommands::Clear => commands::key::clear().await?,
        },
        Commands::Check { url } => {
            commands::check::run(&url).await?;
        }
        Commands::Usage { day } => {
            commands::usage::run(day).await?;
        }
        Commands::Refresh => {
            commands::refresh::run().await?;
        }
        Commands::Run { offline } => {
            commands::run_cmd::run(offline).await?;
        }
    }

    Ok(())
}
