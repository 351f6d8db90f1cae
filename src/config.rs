use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tbtrack_core::sync::DEFAULT_TEAM;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

fn default_scan_concurrency() -> usize {
    32
}

fn default_port() -> u16 {
    5000
}

/// Settings for talking to a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Host base URL (e.g., "http://192.168.1.20:5000")
    #[serde(default)]
    pub host_url: Option<String>,
    /// Timeout for every request to a host
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout for a single discovery probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Probes in flight during a scan
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
    /// Port probed on each candidate address
    #[serde(default = "default_port")]
    pub scan_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            scan_concurrency: default_scan_concurrency(),
            scan_port: default_port(),
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Settings for running as a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name reported to scanning devices
    #[serde(default)]
    pub host_name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host_name: None,
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Name this device pushes under
    pub device_name: ConfigValue<String>,
    /// Team whose records this device works on
    pub team: ConfigValue<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

/// Internal struct for (de)serializing the config file
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    database_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync: Option<SyncConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("tbtrack.db"),
            ConfigSource::Default,
        );
        let mut device_name = ConfigValue::new("Guest Device".to_string(), ConfigSource::Default);
        let mut team = ConfigValue::new(DEFAULT_TEAM.to_string(), ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();
        let mut server = ServerConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Relative paths are relative to the config file
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(name) = file_config.device_name {
                device_name = ConfigValue::new(name, ConfigSource::File);
            }
            if let Some(slug) = file_config.team {
                team = ConfigValue::new(slug, ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
            if let Some(server_config) = file_config.server {
                server = server_config;
            }
        }

        if let Ok(db_path) = std::env::var("TBTRACK_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(name) = std::env::var("TBTRACK_DEVICE_NAME") {
            device_name = ConfigValue::new(name, ConfigSource::Environment);
        }
        if let Ok(slug) = std::env::var("TBTRACK_TEAM") {
            team = ConfigValue::new(slug, ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("TBTRACK_HOST_URL") {
            sync.host_url = Some(url);
        }
        if let Ok(port) = std::env::var("TBTRACK_PORT") {
            server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue("TBTRACK_PORT".to_string(), port))?;
        }
        if let Ok(name) = std::env::var("TBTRACK_HOST_NAME") {
            server.host_name = Some(name);
        }

        Ok(Self {
            database_path,
            device_name,
            team,
            config_file,
            sync,
            server,
        })
    }

    /// Host URL from config, or the locally running server.
    pub fn host_url(&self) -> String {
        self.sync
            .host_url
            .clone()
            .unwrap_or_else(|| self.local_url())
    }

    /// URL of the server running on this machine.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.server.port)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/tbtrack/
    /// - macOS: ~/Library/Application Support/tbtrack/
    /// - Windows: %APPDATA%/tbtrack/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tbtrack")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/tbtrack/
    /// - macOS: ~/Library/Application Support/tbtrack/
    /// - Windows: %APPDATA%/tbtrack/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tbtrack")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    /// Writes a config file holding the current values.
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub fn write_template(&self, path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }

        let file = ConfigFile {
            database_path: Some(self.database_path.value.clone()),
            device_name: Some(self.device_name.value.clone()),
            team: Some(self.team.value.clone()),
            sync: Some(self.sync.clone()),
            server: Some(self.server.clone()),
        };
        let contents = serde_yaml::to_string(&file)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(path.to_path_buf(), e))?;
        }
        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(path.to_path_buf(), e))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    WriteError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(String, String),
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::WriteError(path, e) => {
                write!(f, "Failed to write config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
            ConfigError::AlreadyExists(path) => {
                write!(
                    f,
                    "Config file '{}' already exists (use --force to overwrite)",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("tbtrack.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.team.value, DEFAULT_TEAM);
        assert_eq!(config.sync.scan_port, 5000);
        assert_eq!(config.sync.probe_timeout(), Duration::from_millis(1500));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/tb.sqlite").unwrap();
        writeln!(file, "device_name: clinic-tablet").unwrap();
        writeln!(file, "team: rural-outreach").unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  host_url: http://192.168.1.20:5000").unwrap();
        writeln!(file, "  scan_concurrency: 8").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/tb.sqlite")
        );
        assert_eq!(config.device_name.value, "clinic-tablet");
        assert_eq!(config.device_name.source, ConfigSource::File);
        assert_eq!(config.team.value, "rural-outreach");
        assert_eq!(config.host_url(), "http://192.168.1.20:5000");
        assert_eq!(config.sync.scan_concurrency, 8);
        assert_eq!(config.sync.request_timeout_secs, 10);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_database_path() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "database_path: data/tb.db\n").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/tb.db")
        );
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "device_name: fromfile\n").unwrap();

        std::env::set_var("TBTRACK_DEVICE_NAME", "fromenv");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.device_name.value, "fromenv");
        assert_eq!(config.device_name.source, ConfigSource::Environment);

        std::env::remove_var("TBTRACK_DEVICE_NAME");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let err = Config::load(Some(config_path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_write_template_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested/config.yaml");

        let config = Config::load(Some(config_path.clone())).unwrap();
        config.write_template(&config_path, false).unwrap();

        let reloaded = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(reloaded.device_name.value, config.device_name.value);
        assert_eq!(reloaded.device_name.source, ConfigSource::File);

        let err = config.write_template(&config_path, false).unwrap_err();
        assert!(matches!(err, ConfigError::AlreadyExists(_)));
    }
}
