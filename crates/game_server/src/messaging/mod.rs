//! Client message envelopes and their routing to script callbacks.

pub mod router;
pub mod types;

pub use router::{route_client_message, RoutedMessage};
pub use types::{ClientMessage, ServerMessage};
