//! # Dedicated Server
//!
//! Entry point of the dedicated server: CLI parsing, configuration loading,
//! logging setup and the application lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (config.toml is created if missing)
//! dedicated_server
//!
//! # Override specific settings
//! dedicated_server --address 0.0.0.0 --port 25565 --plugins /srv/game --log-level debug
//!
//! # JSON logging for production
//! dedicated_server --json-logs
//! ```
//!
//! ## Exit Codes
//!
//! * **0**: clean shutdown
//! * **1**: configuration, script loading or binding failed, or a second
//!   shutdown signal arrived
//! * **2**: the transport failed while running
//! * **3**: a script failed with `stop_on_script_error` enabled
//! * any other value passed to `StopServer` by a script

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

pub use config::{LoggingSettings, MasterServerSettings, PluginSettings, ServerSettings};

/// Runs the dedicated server and returns the process exit code.
pub async fn init() -> i32 {
    let args = CliArgs::parse();

    // logging needs its settings before the full configuration is validated
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        return 1;
    }

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            return 1;
        }
    };

    match app.run().await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Application error: {e}");
            1
        }
    }
}
