//! Configuration management for the dedicated server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use game_server::{MasterServerConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    25565
}

fn default_players() -> usize {
    64
}

fn default_motd() -> String {
    "A dedicated server".to_string()
}

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_plugin_home() -> String {
    "server".to_string()
}

fn default_master_address() -> String {
    "localhost".to_string()
}

fn default_master_port() -> u16 {
    25560
}

fn default_master_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Levels accepted by `[logging] level` and `--log-level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub master_server: MasterServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network and gameplay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Numeric IP address to bind the server to
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of concurrent players
    #[serde(default = "default_players")]
    pub players: usize,
    /// Message of the day
    #[serde(default = "default_motd")]
    pub motd: String,
    /// Idle time between server ticks in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Stop the server when a script handler fails
    #[serde(default)]
    pub stop_on_script_error: bool,
}

/// Script loading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Plugin home; scripts are read from `<home>/scripts`
    #[serde(default = "default_plugin_home")]
    pub home: String,
    /// Script files in load order; empty loads every script found
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// Master server announcement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterServerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_master_address")]
    pub address: String,
    #[serde(default = "default_master_port")]
    pub port: u16,
    /// Seconds between announcements
    #[serde(default = "default_master_interval")]
    pub interval_secs: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            players: default_players(),
            motd: default_motd(),
            tick_interval_ms: default_tick_interval(),
            stop_on_script_error: false,
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            home: default_plugin_home(),
            scripts: Vec::new(),
        }
    }
}

impl Default for MasterServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_master_address(),
            port: default_master_port(),
            interval_secs: default_master_interval(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the file configuration to the game server's configuration.
    ///
    /// Call [`validate`](Self::validate) first; an invalid address is
    /// reported here as well.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let ip: IpAddr = self.server.address.parse()?;
        let master = self.master_server.enabled.then(|| MasterServerConfig {
            address: self.master_server.address.clone(),
            port: self.master_server.port,
            interval: Duration::from_secs(self.master_server.interval_secs.max(1)),
        });

        Ok(ServerConfig {
            bind_address: SocketAddr::new(ip, self.server.port),
            max_players: self.server.players,
            motd: self.server.motd.clone(),
            tick_interval_ms: self.server.tick_interval_ms,
            stop_on_script_error: self.server.stop_on_script_error,
            plugin_home: PathBuf::from(&self.plugins.home),
            scripts: self.plugins.scripts.clone(),
            master,
            ..ServerConfig::default()
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        // host names are not resolved for the bind address
        if self.server.address.parse::<IpAddr>().is_err() {
            return Err(format!(
                "Invalid server address: {} (must be a numeric IP address)",
                &self.server.address
            ));
        }

        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.server.players == 0 {
            return Err("Server must allow at least one player".to_string());
        }
        if self.server.players > usize::from(u16::MAX) + 1 {
            return Err(format!(
                "Server cannot hold more than {} players",
                usize::from(u16::MAX) + 1
            ));
        }

        if self.plugins.home.is_empty() {
            return Err("Plugin home cannot be empty".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        if self.master_server.enabled && self.master_server.address.is_empty() {
            return Err("Master server is enabled but has no address".to_string());
        }

        Ok(())
    }
}
