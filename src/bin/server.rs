//! tbtrack host server
//!
//! Accepts pushes from field devices, stages them for review, and serves the
//! team datasets they pull.
//!
//! # Configuration
//!
//! Reads the same config file as the CLI (`~/.config/tbtrack/config.yaml`,
//! or the path in `TBTRACK_CONFIG`). Environment variables:
//! - `TBTRACK_PORT`: Port to listen on (default: 5000)
//! - `TBTRACK_DATABASE_PATH`: SQLite database (default: ~/.local/share/tbtrack/tbtrack.db)
//! - `TBTRACK_HOST_NAME`: Name reported to scanning devices (default: `$HOSTNAME`)

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tbtrack::config::Config;
use tbtrack::db::{init_db, StagingRepository};
use tbtrack::server::{router, AppState};

fn host_name(config: &Config) -> String {
    config
        .server
        .host_name
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "tbtrack-host".to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tbtrack=info,tbtrack_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("TBTRACK_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path)?;

    tracing::info!(
        "Database: {} ({})",
        config.database_path.value.display(),
        config.database_path.source
    );
    let pool = init_db(&config.database_path.value).await?;

    let staged_teams = StagingRepository::new(pool.clone()).teams().await?;
    if !staged_teams.is_empty() {
        tracing::info!("Staged batches waiting for teams: {}", staged_teams.join(", "));
    }

    let name = host_name(&config);
    let app = router(AppState::new(pool, &name));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Starting host '{}' on {}", name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
