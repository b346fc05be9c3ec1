//! Server configuration types and defaults.
//!
//! This is the already-validated view of the configuration the server loop
//! runs with. File parsing and CLI overrides live in the binary crate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where to announce the server, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterServerConfig {
    pub address: String,
    pub port: u16,
    pub interval: Duration,
}

/// Configuration structure for the game server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent players
    pub max_players: usize,

    /// Message of the day reported to the master server and new players
    pub motd: String,

    /// Idle time between server ticks in milliseconds
    pub tick_interval_ms: u64,

    /// Stop the server when a script handler or timer callback fails
    pub stop_on_script_error: bool,

    /// Plugin home directory; scripts are loaded from `<home>/scripts`
    pub plugin_home: PathBuf,

    /// Script files to load, in order. Empty loads everything found.
    pub scripts: Vec<String>,

    /// Master server announcements, disabled when `None`
    pub master: Option<MasterServerConfig>,

    /// Upper bound for waiting on the heartbeat task during shutdown
    pub heartbeat_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 25565)),
            max_players: 64,
            motd: "A dedicated server".to_string(),
            tick_interval_ms: 50,
            stop_on_script_error: false,
            plugin_home: PathBuf::from("server"),
            scripts: Vec::new(),
            master: None,
            heartbeat_grace: master_client::DEFAULT_JOIN_GRACE,
        }
    }
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
