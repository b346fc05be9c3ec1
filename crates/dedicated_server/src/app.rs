//! Main application logic and lifecycle management.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals::setup_signal_handlers};
use game_server::{ServerLoop, ShutdownState, WebSocketTransport};
use std::path::PathBuf;
use tracing::{error, info};

/// Owns the validated configuration and runs the server with it.
pub struct Application {
    config: AppConfig,
    config_path: PathBuf,
}

impl Application {
    /// Loads the configuration file, applies CLI overrides and validates the
    /// result.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let config = AppConfig::load_from_file(&args.config_path).await?;
        Self::with_config(config, args)
    }

    /// Applies `args` on top of an already loaded `config`.
    pub fn with_config(mut config: AppConfig, args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(home) = args.plugin_home {
            config.plugins.home = home.to_string_lossy().to_string();
        }
        if let Some(address) = args.address {
            config.server.address = address;
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| format!("Configuration validation failed: {e}"))?;
        info!("✅ Configuration loaded and validated successfully");

        Ok(Self {
            config,
            config_path: args.config_path,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs the server until it stops.
    ///
    /// # Returns
    ///
    /// The exit code produced by the server loop, or an error if the server
    /// could not be constructed.
    pub async fn run(self) -> Result<i32, Box<dyn std::error::Error>> {
        display_banner();
        self.log_configuration_summary();

        let server_config = self.config.to_server_config()?;
        let shutdown_state = ShutdownState::new();
        let server = ServerLoop::new(
            server_config,
            Box::new(WebSocketTransport::new()),
            shutdown_state.clone(),
        )?;

        let signal_handle = tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers(shutdown_state).await {
                error!("Failed to set up shutdown signal handler: {e}");
            }
        });

        info!("🛑 Press Ctrl+C to gracefully shutdown");
        let code = server.run().await;
        signal_handle.abort();

        if code == 0 {
            info!("✅ Server shutdown complete");
        } else {
            error!("❌ Server stopped with exit code {}", code);
        }
        Ok(code)
    }

    fn log_configuration_summary(&self) {
        let server = &self.config.server;
        info!("📋 Configuration Summary:");
        info!("  📂 Config file: {}", self.config_path.display());
        info!("  🌐 Bind address: {}:{}", server.address, server.port);
        info!("  👥 Max players: {}", server.players);
        info!("  💬 MOTD: {}", server.motd);
        info!("  🔌 Plugin home: {}", self.config.plugins.home);
        if self.config.master_server.enabled {
            info!(
                "  📣 Master server: {}:{} every {}s",
                self.config.master_server.address,
                self.config.master_server.port,
                self.config.master_server.interval_secs
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["dedicated_server"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_overrides_file_settings() {
        let app = Application::with_config(
            AppConfig::default(),
            args(&["--address", "127.0.0.1", "--port", "25000", "-p", "/srv/game", "--json-logs"]),
        )
        .unwrap();
        assert_eq!(app.config().server.address, "127.0.0.1");
        assert_eq!(app.config().server.port, 25000);
        assert_eq!(app.config().plugins.home, "/srv/game");
        assert!(app.config().logging.json_format);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        assert!(Application::with_config(AppConfig::default(), args(&["--address", "example.com"])).is_err());
        assert!(Application::with_config(AppConfig::default(), args(&["-l", "loud"])).is_err());
    }

    #[tokio::test]
    async fn test_new_creates_missing_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path_arg = path.to_string_lossy().to_string();

        let app = Application::new(args(&["--config", path_arg.as_str()])).await.unwrap();
        assert!(path.exists());
        assert_eq!(app.config(), &AppConfig::default());
    }
}
