//! Sync CLI commands for exchanging records with a host.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;

use tbtrack::client::HostClient;
use tbtrack::config::{Config, ConfigError};
use tbtrack::db::{SessionRepository, SqliteStore, TeamRepository};
use tbtrack::discovery::{self, DiscoveryError, ScanOptions};
use tbtrack_core::sync::{
    MemberInfo, MemberRole, MemberStatus, PatientCounts, Strategy, SyncSession, DEFAULT_TEAM,
};
use tbtrack_core::{RecordStore, StoreError, SyncError};

/// Exchange records with a host
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: SyncSubcommand,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Send every local record and deletion to the host for review
    Push,

    /// Mirror the host's dataset, incrementally after the first pull
    Pull,

    /// Merge the host's dataset into the local database
    Fetch {
        /// APPEND keeps local copies; REPLACE takes the host's copies
        #[arg(long, default_value = "APPEND")]
        strategy: Strategy,
    },

    /// Look for a host on the local network
    Scan {
        /// First three octets to scan (default: this machine's network)
        #[arg(long)]
        base: Option<String>,

        /// Write the host found to the config file
        #[arg(long)]
        save: bool,
    },

    /// Show the sync session and host status
    Status,
}

impl SyncCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            SyncSubcommand::Push => self.push(pool, config).await,
            SyncSubcommand::Pull => self.pull(pool, config).await,
            SyncSubcommand::Fetch { strategy } => self.fetch(pool, config, *strategy).await,
            SyncSubcommand::Scan { base, save } => self.scan(config, base.as_deref(), *save).await,
            SyncSubcommand::Status => self.status(pool, config).await,
        }
    }

    /// Loads the session for this device and points it at the configured host.
    async fn session(
        &self,
        sessions: &SessionRepository,
        config: &Config,
    ) -> Result<(SyncSession, HostClient), SyncCommandError> {
        let client = HostClient::new(
            &config.host_url(),
            config.device_name.value.clone(),
            config.sync.request_timeout(),
        )?;
        let mut session = sessions
            .load(&config.team.value, &config.device_name.value)
            .await?;
        session.retarget(client.base_url());
        Ok((session, client))
    }

    async fn push(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let sessions = SessionRepository::new(pool.clone());
        let (mut session, client) = self.session(&sessions, config).await?;
        let store = SqliteStore::new(pool.clone());

        let teams = TeamRepository::new(pool.clone());
        let mut memberships = teams.memberships(&session.device).await?;
        if session.team != DEFAULT_TEAM && !memberships.iter().any(|m| m.team_slug == session.team)
        {
            // Asks the host to add this device; it stays PENDING until approved.
            memberships.push(MemberInfo {
                team_slug: session.team.clone(),
                user_name: session.device.clone(),
                device_id: session.device.clone(),
                status: MemberStatus::Pending,
                role: MemberRole::Member,
            });
        }
        let known_teams = teams
            .teams()
            .await?
            .into_iter()
            .filter(|t| memberships.iter().any(|m| m.team_slug == t.slug))
            .collect();

        println!("Pushing {} to {}...", session.team, client.base_url());
        let response = session
            .push(&client, &store, known_teams, memberships)
            .await?;
        sessions.save(&session).await?;

        println!(
            "Staged {} record(s) for review (batch {}).",
            response.count, response.batch_id
        );
        Ok(())
    }

    async fn pull(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let sessions = SessionRepository::new(pool.clone());
        let (mut session, client) = self.session(&sessions, config).await?;
        let store = SqliteStore::new(pool.clone());

        println!("Pulling {} from {}...", session.team, client.base_url());
        let result = session.pull(&client, &store).await;
        // A failed pull clears the watermark; persist that too.
        sessions.save(&session).await?;
        let report = result?;

        println!(
            "{} sync: {} added or updated, {} removed (watermark {}).",
            if report.full { "Full" } else { "Delta" },
            report.counts.added,
            report.counts.deleted,
            report.watermark
        );
        Ok(())
    }

    async fn fetch(
        &self,
        pool: &SqlitePool,
        config: &Config,
        strategy: Strategy,
    ) -> Result<(), SyncCommandError> {
        let sessions = SessionRepository::new(pool.clone());
        let (mut session, client) = self.session(&sessions, config).await?;
        let store = SqliteStore::new(pool.clone());

        println!("Fetching {} from {} ({})...", session.team, client.base_url(), strategy);
        let counts = session.fetch(&client, &store, strategy).await?;
        println!(
            "Merged: {} added or replaced, {} removed.",
            counts.added, counts.deleted
        );
        Ok(())
    }

    async fn scan(
        &self,
        config: &Config,
        base: Option<&str>,
        save: bool,
    ) -> Result<(), SyncCommandError> {
        let base = match base {
            Some(base) => base.to_string(),
            None => discovery::local_base()?,
        };
        let options = ScanOptions {
            port: config.sync.scan_port,
            concurrency: config.sync.scan_concurrency,
            probe_timeout: config.sync.probe_timeout(),
            device: config.device_name.value.clone(),
        };

        println!("Scanning {}.1-254 on port {}...", base, options.port);
        let found = discovery::scan(&base, &options).await?;
        println!("Found host '{}' at {}", found.info.hostname, found.url);

        if save {
            let path = config
                .config_file
                .clone()
                .unwrap_or_else(Config::default_config_path);
            let mut updated = config.clone();
            updated.sync.host_url = Some(found.url.clone());
            updated.write_template(&path, true)?;
            println!("Saved host to {}", path.display());
        } else {
            println!("Use --save or set TBTRACK_HOST_URL={} to sync with it.", found.url);
        }
        Ok(())
    }

    async fn status(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let sessions = SessionRepository::new(pool.clone());
        let (session, client) = self.session(&sessions, config).await?;
        let local = SqliteStore::new(pool.clone()).list(&session.team).await?;
        let counts = PatientCounts::tally(&local);

        println!("Sync Status");
        println!("===========");
        println!();
        println!("Device:    {}", session.device);
        println!("Team:      {}", session.team);
        println!("Host:      {}", client.base_url());
        match session.watermark {
            Some(mark) => println!("Watermark: {}", mark),
            None => println!("Watermark: none (next pull is a full sync)"),
        }
        println!(
            "Local:     {} patient(s): {} active, {} cured, {} closed",
            counts.total(),
            counts.active,
            counts.cured,
            counts.closed
        );
        println!();

        print!("Host status: ");
        match client.host_info().await {
            Ok(info) => {
                println!("✓ {} ({} device(s) known)", info.hostname, info.devices.len());
                for device in info.devices.iter().filter(|d| d.has_pending) {
                    println!("  {} has records waiting for review", device.name);
                }
            }
            Err(SyncError::NetworkUnavailable { .. }) => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Sync(SyncError),
    Discovery(DiscoveryError),
    Config(ConfigError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Sync(SyncError::AccessDenied { team, .. }) => write!(
                f,
                "This device is not approved for team '{}'. Ask the host to approve it.",
                team
            ),
            SyncCommandError::Sync(e) => write!(f, "{}", e),
            SyncCommandError::Discovery(e) => write!(f, "{}", e),
            SyncCommandError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Sync(e) => Some(e),
            SyncCommandError::Discovery(e) => Some(e),
            SyncCommandError::Config(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::Sync(e)
    }
}

impl From<StoreError> for SyncCommandError {
    fn from(e: StoreError) -> Self {
        SyncCommandError::Sync(SyncError::Store(e))
    }
}

impl From<DiscoveryError> for SyncCommandError {
    fn from(e: DiscoveryError) -> Self {
        SyncCommandError::Discovery(e)
    }
}

impl From<ConfigError> for SyncCommandError {
    fn from(e: ConfigError) -> Self {
        SyncCommandError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_message() {
        let err = SyncCommandError::from(SyncError::AccessDenied {
            team: "north".to_string(),
            device: "phone".to_string(),
        });
        assert!(err.to_string().contains("not approved for team 'north'"));
    }

    #[test]
    fn test_store_error_wraps_as_sync() {
        let err = SyncCommandError::from(StoreError::Backend("disk full".to_string()));
        assert!(matches!(err, SyncCommandError::Sync(SyncError::Store(_))));
    }
}
