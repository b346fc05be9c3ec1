//! # Game Server
//!
//! The runtime core of a dedicated multiplayer server. Game rules live in
//! scripts; this crate moves players and messages between the network and
//! the script runtime.
//!
//! ## Components
//!
//! * [`ServerLoop`] - single-task loop: poll the transport, dispatch script
//!   callbacks, carry out script commands, advance timers
//! * [`transport`] - the [`Transport`] trait and its WebSocket implementation
//! * [`messaging`] - the JSON envelope clients speak and its routing to
//!   callbacks
//! * [`ShutdownState`] - shared flag set by signal handlers
//!
//! ## Message Flow
//!
//! 1. A client sends `{"event": "...", "data": {...}}` over its connection
//! 2. The transport surfaces it on the next poll
//! 3. The router maps it to a callback such as `OnPlayerSendMessage`
//! 4. Handlers run in script load order; boolean callbacks may veto
//! 5. Commands the handlers queued are flushed to the transport
//!
//! ## Exit codes
//!
//! [`ServerLoop::run`] returns the process exit code, see [`error`].

pub use config::{MasterServerConfig, ServerConfig};
pub use error::ServerError;
pub use server::{ServerLoop, ServerState};
pub use shutdown::ShutdownState;
pub use transport::{Transport, TransportError, TransportEvent, WebSocketTransport};

pub mod config;
pub mod error;
pub mod messaging;
pub mod server;
pub mod shutdown;
pub mod transport;
