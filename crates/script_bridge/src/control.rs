//! Commands issued by scripts that the server loop must carry out.
//!
//! Natives run inside the loop task but do not own the transport, so
//! anything that touches a connection is queued here and flushed by the loop
//! after each dispatch phase.

use crate::value::PlayerId;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An outbound action requested by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Chat line for `player`, or for everyone when `broadcast` is set
    SendMessage {
        player: PlayerId,
        message: String,
        broadcast: bool,
    },
    CleanChat { player: PlayerId },
    Kick { player: PlayerId },
}

#[derive(Debug, Default)]
struct ControlState {
    stop_code: Option<i32>,
    outbox: Vec<ServerCommand>,
}

/// Stop requests and queued commands shared between natives and the loop.
#[derive(Debug, Default)]
pub struct ServerControl {
    state: Mutex<ControlState>,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests a shutdown with `code`. The first request wins.
    pub fn request_stop(&self, code: i32) {
        let mut state = self.state();
        if state.stop_code.is_none() {
            state.stop_code = Some(code);
        }
    }

    pub fn stop_requested(&self) -> Option<i32> {
        self.state().stop_code
    }

    pub fn push(&self, command: ServerCommand) {
        self.state().outbox.push(command);
    }

    /// Takes every queued command in issue order.
    pub fn drain(&self) -> Vec<ServerCommand> {
        std::mem::take(&mut self.state().outbox)
    }
}
