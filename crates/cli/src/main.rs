//! Wandersim CLI - Database migrations and destination catalog management.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! wandersim-cli migrate
//!
//! # Add or update a destination
//! wandersim-cli destinations add --slug japan --name Japan
//!
//! # List the destination catalog
//! wandersim-cli destinations list
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "wandersim-cli")]
#[command(author, version, about = "Wandersim CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage the destination catalog
    Destinations {
        #[command(subcommand)]
        action: DestinationAction,
    },
}

#[derive(Subcommand)]
enum DestinationAction {
    /// Add or update a destination
    Add {
        /// URL-safe destination identifier (e.g., south-korea)
        #[arg(short, long)]
        slug: String,

        /// Human-readable display name (e.g., "South Korea")
        #[arg(short, long)]
        name: String,
    },
    /// List all destinations
    List,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Destinations { action } => match action {
            DestinationAction::Add { slug, name } => {
                commands::destinations::add(&slug, &name).await?;
            }
            DestinationAction::List => commands::destinations::list().await?,
        },
    }
    Ok(())
}
