//! DentCoach CLI, the main entry point.
//!
//! Commands:
//! - `init`       Write a default config file
//! - `serve`      Start the HTTP API server
//! - `chat`       Interactive or single-message coaching
//! - `knowledge`  Administer the knowledge base
//! - `check`      Diagnose configuration and connectivity

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dentcoach",
    about = "DentCoach - knowledge-grounded AI coaching for dental practices",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the coach
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Print the reply as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Manage knowledge base entries
    Knowledge {
        #[command(subcommand)]
        action: commands::knowledge::KnowledgeAction,
    },

    /// Diagnose configuration, store and provider
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat { message, json } => commands::chat::run(message, json).await?,
        Commands::Knowledge { action } => commands::knowledge::run(action).await?,
        Commands::Check => commands::check::run().await?,
    }

    Ok(())
}
