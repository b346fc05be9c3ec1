//! Signal handling for graceful server shutdown.
//!
//! The first SIGINT or SIGTERM (Ctrl+C on Windows) asks the server loop to
//! drain. A second one exits the process immediately with code 1.

use game_server::ShutdownState;
use tokio::signal;
use tracing::{info, warn};

/// Waits until the process receives a termination signal.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}

/// Initiates `shutdown_state` on the first signal and exits on the second.
///
/// Meant to be spawned next to the server loop; it only returns if signal
/// handling could not be installed.
pub async fn setup_signal_handlers(shutdown_state: ShutdownState) -> std::io::Result<()> {
    wait_for_signal().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    shutdown_state.initiate_shutdown();

    wait_for_signal().await?;
    warn!("Shutdown signal received again! Exiting immediately.");
    std::process::exit(1);
}
