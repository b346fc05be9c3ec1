//! Message routing logic for dispatching client messages to callbacks.

use crate::{error::ServerError, messaging::ClientMessage};
use script_bridge::{PlayerId, ScriptValue, ServerEvent, TypeTag};
use tracing::{debug, warn};

/// A client message translated into a callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub event: ServerEvent,
    /// Arguments in the callback's parameter order, player id first
    pub args: Vec<ScriptValue>,
}

/// Parses `payload` from `player` and maps it to the callback it triggers.
///
/// # Returns
///
/// `Ok(None)` for well-formed messages naming an unknown event; they are
/// logged and dropped. Malformed envelopes and missing fields are errors.
///
/// # Routed events
///
/// | event | callback | data |
/// |---|---|---|
/// | `chat` | `OnPlayerSendMessage` | `{ "message": string }` |
/// | `gui_action` | `OnGUIAction` | `{ "id": int, "data": string }` |
/// | `death` | `OnPlayerDeath` | |
/// | `resurrect` | `OnPlayerResurrect` | |
/// | `change_cell` | `OnPlayerChangeCell` | |
/// | `change_attributes` | `OnPlayerChangeAttributes` | |
/// | `change_skills` | `OnPlayerChangeSkills` | |
/// | `update_equipment` | `OnPlayerUpdateEquipment` | |
/// | `end_chargen` | `OnPlayerEndCharGen` | |
pub fn route_client_message(player: PlayerId, payload: &[u8]) -> Result<Option<RoutedMessage>, ServerError> {
    let message: ClientMessage =
        serde_json::from_slice(payload).map_err(|e| ServerError::InvalidMessage(format!("Invalid JSON: {e}")))?;

    let pid = ScriptValue::from(player);
    let routed = match message.event.as_str() {
        "chat" => RoutedMessage {
            event: ServerEvent::PlayerSendMessage,
            args: vec![pid, field(&message, "message", TypeTag::Str)?],
        },
        "gui_action" => RoutedMessage {
            event: ServerEvent::GuiAction,
            args: vec![
                pid,
                field(&message, "id", TypeTag::Int)?,
                gui_data(&message)?,
            ],
        },
        other => {
            let Some(event) = simple_event(other) else {
                warn!("❓ Dropping unknown event '{}' from player {}", other, player);
                return Ok(None);
            };
            RoutedMessage { event, args: vec![pid] }
        }
    };

    debug!("📨 Routing '{}' from player {} to {}", message.event, player, routed.event);
    Ok(Some(routed))
}

/// Events whose only argument is the player id.
fn simple_event(name: &str) -> Option<ServerEvent> {
    let event = match name {
        "death" => ServerEvent::PlayerDeath,
        "resurrect" => ServerEvent::PlayerResurrect,
        "change_cell" => ServerEvent::PlayerChangeCell,
        "change_attributes" => ServerEvent::PlayerChangeAttributes,
        "change_skills" => ServerEvent::PlayerChangeSkills,
        "update_equipment" => ServerEvent::PlayerUpdateEquipment,
        "end_chargen" => ServerEvent::PlayerEndCharGen,
        _ => return None,
    };
    Some(event)
}

/// Reads `name` from the message data as a value of type `tag`.
fn field(message: &ClientMessage, name: &str, tag: TypeTag) -> Result<ScriptValue, ServerError> {
    message
        .data
        .get(name)
        .map(ScriptValue::from_json)
        .and_then(|value| value.coerce(tag))
        .ok_or_else(|| missing(message, name, tag))
}

/// GUI payloads may be structured; objects reach scripts as JSON text.
fn gui_data(message: &ClientMessage) -> Result<ScriptValue, ServerError> {
    match message.data.get("data").map(ScriptValue::from_json) {
        Some(text @ ScriptValue::Str(_)) => Ok(text),
        Some(ScriptValue::Nil) | None => Err(missing(message, "data", TypeTag::Str)),
        Some(other) => Ok(ScriptValue::Str(other.to_string())),
    }
}

fn missing(message: &ClientMessage, field: &str, tag: TypeTag) -> ServerError {
    ServerError::InvalidMessage(format!("'{}' needs {} field '{}'", message.event, tag, field))
}
