use clap::{Args, Subcommand};
use std::path::Path;

use tbtrack::config::Config;

use super::OutputFormat;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a config file with the current values
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

impl ConfigCommand {
    /// `requested` is the `--config` path, which may not exist yet.
    pub fn run(
        &self,
        config: &Config,
        requested: Option<&Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  source: {}", config.database_path.source);
                        println!("device_name: {}", config.device_name.value);
                        println!("  source: {}", config.device_name.source);
                        println!("team: {}", config.team.value);
                        println!("  source: {}", config.team.source);
                        println!();

                        println!("sync:");
                        println!("  host_url: {}", config.host_url());
                        println!("  request_timeout_secs: {}", config.sync.request_timeout_secs);
                        println!("  probe_timeout_ms: {}", config.sync.probe_timeout_ms);
                        println!("  scan_concurrency: {}", config.sync.scan_concurrency);
                        println!("  scan_port: {}", config.sync.scan_port);
                        println!("server:");
                        println!("  port: {}", config.server.port);
                        println!(
                            "  host_name: {}",
                            config.server.host_name.as_deref().unwrap_or("(system hostname)")
                        );
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init { force } => {
                let path = requested
                    .map(Path::to_path_buf)
                    .or_else(|| config.config_file.clone())
                    .unwrap_or_else(Config::default_config_path);
                config.write_template(&path, *force)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}
