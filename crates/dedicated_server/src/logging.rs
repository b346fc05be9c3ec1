//! Logging system setup and configuration.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the configured level. `json_format`
/// forces JSON output regardless of the configuration.
///
/// # Returns
///
/// An error if a global subscriber was already installed.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer()
                .json()
                .with_file(false)
                .with_line_number(false)
                .with_thread_names(true)
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_target(true)
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Logs the startup banner with the server and protocol versions.
pub fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("╔══════════════════════════════════════════╗");
    info!("║            DEDICATED SERVER              ║");
    info!("║  version {:<10} protocol {:<10}   ║", version, script_bridge::PROTOCOL_VERSION);
    info!("╚══════════════════════════════════════════╝");
}
