use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, EventCommand, PatientCommand, ReviewCommand, SyncCommand};
use tbtrack::config::Config;
use tbtrack::db::{init_db, SqliteStore};

#[derive(Parser)]
#[command(name = "tbtrack")]
#[command(version)]
#[command(about = "Track TB treatment milestones and sync them between devices", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage patients
    Patient(PatientCommand),

    /// Update treatment milestones
    Event(EventCommand),

    /// Exchange records with a host
    Sync(SyncCommand),

    /// Review records other devices pushed to this host
    Review(ReviewCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.clone())?;

    match cli.command {
        Some(Commands::Patient(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&SqliteStore::new(pool), &config).await?;
        }
        Some(Commands::Event(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&SqliteStore::new(pool), &config).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&pool, &config).await?;
        }
        Some(Commands::Review(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config, cli.config.as_deref())?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
