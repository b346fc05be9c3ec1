//! # Callback Registry
//!
//! Maps the fixed set of server events to the script functions that handle
//! them. Handlers are bound while modules load: every loaded module that
//! defines a function named after an event (with a matching parameter count)
//! gets appended to that event's handler list.
//!
//! ## Dispatch policy
//!
//! * Handlers run in the order they were bound.
//! * Boolean events short-circuit on the first handler that returns `false`.
//!   Handlers bound before the veto have already run; later ones are skipped.
//! * Void events run every handler.
//! * A failing handler is logged and skipped. For boolean events a failure
//!   counts as "no veto".
//! * An event with no handlers is a no-op that reports the default verdict.

use crate::engine::ScriptTarget;
use crate::error::{MarshalError, ScriptError};
use crate::marshal;
use crate::value::{ScriptValue, Signature, TypeTag};
use dashmap::DashMap;
use std::fmt;
use tracing::{error, trace, warn};

/// Events the server raises into scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    ServerInit,
    ServerExit,
    PlayerConnect,
    PlayerDisconnect,
    PlayerDeath,
    PlayerResurrect,
    PlayerChangeCell,
    PlayerChangeAttributes,
    PlayerChangeSkills,
    PlayerUpdateEquipment,
    PlayerSendMessage,
    PlayerEndCharGen,
    GuiAction,
}

impl ServerEvent {
    pub const ALL: [ServerEvent; 13] = [
        ServerEvent::ServerInit,
        ServerEvent::ServerExit,
        ServerEvent::PlayerConnect,
        ServerEvent::PlayerDisconnect,
        ServerEvent::PlayerDeath,
        ServerEvent::PlayerResurrect,
        ServerEvent::PlayerChangeCell,
        ServerEvent::PlayerChangeAttributes,
        ServerEvent::PlayerChangeSkills,
        ServerEvent::PlayerUpdateEquipment,
        ServerEvent::PlayerSendMessage,
        ServerEvent::PlayerEndCharGen,
        ServerEvent::GuiAction,
    ];

    /// The script function name handling this event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ServerInit => "OnServerInit",
            ServerEvent::ServerExit => "OnServerExit",
            ServerEvent::PlayerConnect => "OnPlayerConnect",
            ServerEvent::PlayerDisconnect => "OnPlayerDisconnect",
            ServerEvent::PlayerDeath => "OnPlayerDeath",
            ServerEvent::PlayerResurrect => "OnPlayerResurrect",
            ServerEvent::PlayerChangeCell => "OnPlayerChangeCell",
            ServerEvent::PlayerChangeAttributes => "OnPlayerChangeAttributes",
            ServerEvent::PlayerChangeSkills => "OnPlayerChangeSkills",
            ServerEvent::PlayerUpdateEquipment => "OnPlayerUpdateEquipment",
            ServerEvent::PlayerSendMessage => "OnPlayerSendMessage",
            ServerEvent::PlayerEndCharGen => "OnPlayerEndCharGen",
            ServerEvent::GuiAction => "OnGUIAction",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }

    pub fn signature(&self) -> Signature {
        use TypeTag::{Bool, Int, Str, Void};
        match self {
            ServerEvent::ServerInit => Signature::new(Void, &[]),
            ServerEvent::ServerExit => Signature::new(Void, &[Bool]),
            ServerEvent::PlayerConnect => Signature::new(Bool, &[Int]),
            ServerEvent::PlayerSendMessage => Signature::new(Bool, &[Int, Str]),
            ServerEvent::GuiAction => Signature::new(Void, &[Int, Int, Str]),
            _ => Signature::new(Void, &[Int]),
        }
    }

    /// Whether handlers may veto the server's default behaviour.
    pub fn is_boolean(&self) -> bool {
        self.signature().returns == TypeTag::Bool
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Handlers that were invoked, including failed ones
    pub handlers_run: usize,
    pub failures: usize,
    /// `false` only when a boolean event was vetoed
    pub verdict: bool,
}

impl Dispatched {
    fn empty() -> Self {
        Self {
            handlers_run: 0,
            failures: 0,
            verdict: true,
        }
    }
}

/// Ordered handler lists per event.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: DashMap<ServerEvent, Vec<ScriptTarget>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `target` to the handlers of `event`.
    pub fn bind(&self, event: ServerEvent, target: ScriptTarget) {
        trace!("🔗 Binding {} to {}", event, target);
        self.slots.entry(event).or_default().push(target);
    }

    /// Snapshot of the handlers bound to `event`, in binding order.
    pub fn handlers(&self, event: ServerEvent) -> Vec<ScriptTarget> {
        self.slots
            .get(&event)
            .map(|handlers| handlers.clone())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, event: ServerEvent) -> usize {
        self.slots.get(&event).map(|h| h.len()).unwrap_or(0)
    }

    /// Invokes the handlers of `event` with `raw` through `invoke`.
    ///
    /// The handler list is copied before the first handler runs, so handlers
    /// may safely trigger further binds or dispatches.
    ///
    /// # Errors
    ///
    /// Fails only when `raw` does not match the event's signature. Handler
    /// failures are isolated and reported through [`Dispatched::failures`].
    pub fn dispatch<F>(
        &self,
        event: ServerEvent,
        raw: &[ScriptValue],
        mut invoke: F,
    ) -> Result<Dispatched, MarshalError>
    where
        F: FnMut(&ScriptTarget, &[ScriptValue]) -> Result<ScriptValue, ScriptError>,
    {
        let signature = event.signature();
        let args = marshal::pack(&marshal::unpack(raw, &signature.params)?);

        let handlers = self.handlers(event);
        let mut outcome = Dispatched::empty();

        for handler in &handlers {
            outcome.handlers_run += 1;
            match invoke(handler, &args) {
                Ok(value) => {
                    if signature.returns == TypeTag::Bool && !Self::accepts(event, handler, &value) {
                        outcome.verdict = false;
                        break;
                    }
                }
                Err(e) => {
                    outcome.failures += 1;
                    error!("❌ Handler {} for {} failed: {}", handler, event, e);
                }
            }
        }

        Ok(outcome)
    }

    /// Interprets a handler's return value for a boolean event. Returning
    /// nothing means "no objection".
    fn accepts(event: ServerEvent, handler: &ScriptTarget, value: &ScriptValue) -> bool {
        match value {
            ScriptValue::Bool(accept) => *accept,
            ScriptValue::Int(v) => *v != 0,
            ScriptValue::Nil => true,
            other => {
                warn!(
                    "⚠️ Handler {} for {} returned {}, treating as no veto",
                    handler,
                    event,
                    other.tag()
                );
                true
            }
        }
    }
}
