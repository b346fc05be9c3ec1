//! Network transport abstraction.
//!
//! The server loop drives a [`Transport`] from a single task: it polls for
//! surfaced events without blocking, then sends and disconnects in response.
//! [`WebSocketTransport`] is the production implementation.

pub mod websocket;

pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use script_bridge::PlayerId;
use std::net::SocketAddr;
use thiserror::Error;

/// Something that happened on the network since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { player: PlayerId, addr: SocketAddr },
    Disconnected { player: PlayerId },
    Message { player: PlayerId, payload: Vec<u8> },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("transport failed: {0}")]
    Fatal(String),

    #[error("player {0} has no open connection")]
    UnknownPlayer(PlayerId),

    #[error("transport has not been started")]
    NotStarted,

    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer's outbound queue was full; it is being disconnected
    #[error("player {0} is not keeping up and was disconnected")]
    SlowPeer(PlayerId),
}

impl TransportError {
    /// Whether the transport can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_) | TransportError::NotStarted)
    }
}

/// A connection-oriented transport keyed by player id.
///
/// Events for one player are surfaced in order: `Connected`, any number of
/// `Message`s, then `Disconnected`. A player id is not reused before its
/// `Disconnected` event has been surfaced.
#[async_trait]
pub trait Transport: Send {
    /// Binds `address` and starts accepting at most `max_players` sessions.
    /// Returns the bound address.
    async fn startup(&mut self, address: SocketAddr, max_players: usize) -> Result<SocketAddr, TransportError>;

    /// Takes every event surfaced since the previous call. Never blocks.
    fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError>;

    /// Queues `payload` for delivery to `player`.
    fn send(&mut self, player: PlayerId, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Closes the session of `player`. Its `Disconnected` event still follows.
    fn disconnect(&mut self, player: PlayerId) -> Result<(), TransportError>;

    /// Closes every session and stops accepting.
    async fn shutdown(&mut self);
}
