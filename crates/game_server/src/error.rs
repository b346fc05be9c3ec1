//! Error types and exit codes for the game server.
//!
//! Every way the server can stop maps to a process exit code, so the binary
//! only has to forward what [`ServerLoop::run`](crate::ServerLoop::run)
//! returns.

use crate::transport::TransportError;
use script_bridge::RegistryError;
use script_host::ScriptHostError;

/// Clean shutdown.
pub const EXIT_CLEAN: i32 = 0;
/// Configuration, script loading or transport binding failed.
pub const EXIT_STARTUP_FAILURE: i32 = 1;
/// The transport failed while the server was running.
pub const EXIT_TRANSPORT_FATAL: i32 = 2;
/// A script failed and `stop_on_script_error` is enabled.
pub const EXIT_SCRIPT_FATAL: i32 = 3;

/// Enumeration of possible server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The script runtime could not be assembled
    #[error("Runtime setup failed: {0}")]
    Runtime(#[from] RegistryError),

    /// A script module failed to load
    #[error("Script error: {0}")]
    Scripts(#[from] ScriptHostError),

    /// Binding, polling or sending on the transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A client sent something that is not a valid message envelope
    #[error("Invalid client message: {0}")]
    InvalidMessage(String),

    #[error("Server is not in the {expected} state")]
    InvalidState { expected: &'static str },
}

impl ServerError {
    /// Exit code for a failure that happens during startup.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Transport(e) if e.is_fatal() => EXIT_TRANSPORT_FATAL,
            _ => EXIT_STARTUP_FAILURE,
        }
    }
}
