//! Server control natives.
//!
//! Anything that affects a connection is queued on the runtime's
//! [`ServerControl`](crate::ServerControl) and carried out by the server loop.
//! Natives that address a player fail softly when that player is not
//! connected.

use super::{bool_arg, int_arg, str_arg};
use crate::control::ServerCommand;
use crate::error::{NativeError, RegistryError};
use crate::functions::FunctionRegistry;
use crate::marshal::Arguments;
use crate::runtime::CallContext;
use crate::value::{PlayerId, ScriptValue, Signature};
use tracing::{debug, error, info, warn};

pub fn register(functions: &FunctionRegistry) -> Result<(), RegistryError> {
    functions.register_native("StopServer", Signature::parse('v', "i")?, stop_server)?;
    functions.register_native("SendMessage", Signature::parse('v', "isb")?, send_message)?;
    functions.register_native("CleanChat", Signature::parse('v', "i")?, clean_chat)?;
    functions.register_native("Kick", Signature::parse('v', "i")?, kick)?;
    functions.register_native("GetPlayerCount", Signature::parse('i', "")?, |ctx, _| {
        Ok(ScriptValue::Int(ctx.runtime.player_count() as i64))
    })?;
    functions.register_native("GetMaxPlayers", Signature::parse('i', "")?, |ctx, _| {
        Ok(ScriptValue::Int(ctx.runtime.max_players() as i64))
    })?;
    functions.register_native("IsPlayerConnected", Signature::parse('b', "i")?, is_player_connected)?;
    functions.register_native("GetServerVersion", Signature::parse('s', "")?, |ctx, _| {
        Ok(ScriptValue::Str(ctx.runtime.options().server_version.clone()))
    })?;
    functions.register_native("LogMessage", Signature::parse('v', "is")?, log_message)?;
    Ok(())
}

fn stop_server(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    let code = i32::try_from(raw)
        .map_err(|_| NativeError::InvalidArgument(format!("exit code {raw} out of range")))?;
    info!("🛑 Script requested server stop with code {}", code);
    ctx.runtime.control().request_stop(code);
    Ok(ScriptValue::Nil)
}

/// `SendMessage(pid, message, broadcast)`
fn send_message(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let player = ctx.connected_player(int_arg(args, 0)?)?;
    let message = str_arg(args, 1)?.to_string();
    let broadcast = bool_arg(args, 2)?;
    debug!("💬 Chat for {} (broadcast: {}): {}", player, broadcast, message);
    ctx.runtime.control().push(ServerCommand::SendMessage {
        player,
        message,
        broadcast,
    });
    Ok(ScriptValue::Nil)
}

fn clean_chat(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let player = ctx.connected_player(int_arg(args, 0)?)?;
    ctx.runtime.control().push(ServerCommand::CleanChat { player });
    Ok(ScriptValue::Nil)
}

fn kick(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let player = ctx.connected_player(int_arg(args, 0)?)?;
    info!("👢 Kicking player {}", player);
    ctx.runtime.control().push(ServerCommand::Kick { player });
    Ok(ScriptValue::Nil)
}

fn is_player_connected(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    let connected = PlayerId::try_from(raw)
        .map(|pid| ctx.runtime.is_player_connected(pid))
        .unwrap_or(false);
    Ok(ScriptValue::Bool(connected))
}

/// `LogMessage(level, text)`; levels 0 through 4 map to verbose, info, warn,
/// error and fatal.
fn log_message(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let level = int_arg(args, 0)?;
    let text = str_arg(args, 1)?;
    let module = ctx
        .caller
        .and_then(|caller| ctx.runtime.module_path(caller.module))
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "server".to_string());

    match level {
        i64::MIN..=0 => debug!(target: "script", "[{}] {}", module, text),
        1 => info!(target: "script", "[{}] {}", module, text),
        2 => warn!(target: "script", "[{}] {}", module, text),
        _ => error!(target: "script", "[{}] {}", module, text),
    }
    Ok(ScriptValue::Nil)
}
