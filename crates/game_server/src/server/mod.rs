//! The server loop and its event handling.

pub mod core;
mod handlers;

pub use core::{ServerLoop, ServerState};
