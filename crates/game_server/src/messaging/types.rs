//! Message type definitions for client-server communication.

use script_bridge::PlayerId;
use serde::{Deserialize, Serialize};

/// A message sent from a client to the server.
///
/// # Examples
///
/// ```json
/// { "event": "chat", "data": { "message": "hello" } }
/// { "event": "gui_action", "data": { "id": 12, "data": "accept" } }
/// { "event": "death" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Which player action this reports
    pub event: String,

    /// Event payload, absent for events without one
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message of every accepted session
    Welcome {
        player_id: PlayerId,
        server_version: String,
        protocol_version: u32,
        motd: String,
    },
    Chat { message: String },
    CleanChat,
    /// Sent right before the server closes the session
    Disconnected { reason: String },
}

impl ServerMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        // serializing a plain enum of strings and integers cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}
