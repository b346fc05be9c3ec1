//! Timer natives.
//!
//! Scripts address timers by the integer form of [`TimerId`]. Operations on
//! ids that are unknown or already freed are silent no-ops here, logged at
//! debug level; only a non-positive period is reported back to the script.

use super::{array_arg, int_arg, str_arg};
use crate::error::{NativeError, RegistryError, TimerError};
use crate::functions::FunctionRegistry;
use crate::marshal::{self, Arguments};
use crate::runtime::CallContext;
use crate::timers::{TimerId, TimerMode};
use crate::value::{ScriptValue, Signature, TypeDescriptor};
use tracing::debug;

pub fn register(functions: &FunctionRegistry) -> Result<(), RegistryError> {
    functions.register_native("CreateTimer", Signature::parse('i', "si")?, create_timer)?;
    functions.register_native("CreateTimerEx", Signature::parse('i', "sisa")?, create_timer_ex)?;
    functions.register_native("StartTimer", Signature::parse('v', "i")?, start_timer)?;
    functions.register_native("StopTimer", Signature::parse('v', "i")?, stop_timer)?;
    functions.register_native("RestartTimer", Signature::parse('v', "ii")?, restart_timer)?;
    functions.register_native("FreeTimer", Signature::parse('v', "i")?, free_timer)?;
    functions.register_native("IsTimerElapsed", Signature::parse('b', "i")?, is_timer_elapsed)?;
    Ok(())
}

fn create_timer(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let caller = ctx.require_caller()?;
    let callback = str_arg(args, 0)?;
    let period = int_arg(args, 1)?;

    let id = ctx.runtime.timers().create(caller.target(callback), period)?;
    debug!("⏱️ Timer {} created for '{}' every {}ms", id, callback, period);
    Ok(ScriptValue::Int(id.to_raw()))
}

/// `CreateTimerEx(callback, msec, types, args)` binds `args`, validated
/// against `types`, to every invocation of `callback`.
fn create_timer_ex(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let caller = ctx.require_caller()?;
    let callback = str_arg(args, 0)?;
    let period = int_arg(args, 1)?;
    let descriptor = TypeDescriptor::parse(str_arg(args, 2)?)?;
    let bound = marshal::unpack(array_arg(args, 3)?, &descriptor)?;

    let id = ctx.runtime.timers().create_with(
        caller.target(callback),
        period,
        marshal::pack(&bound),
        TimerMode::Repeating,
    )?;
    debug!(
        "⏱️ Timer {} created for '{}' every {}ms with ({})",
        id, callback, period, descriptor
    );
    Ok(ScriptValue::Int(id.to_raw()))
}

fn start_timer(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    tolerate("StartTimer", raw, |id| ctx.runtime.timers().start(id))
}

fn stop_timer(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    tolerate("StopTimer", raw, |id| ctx.runtime.timers().stop(id))
}

fn restart_timer(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    let period = int_arg(args, 1)?;
    tolerate("RestartTimer", raw, |id| ctx.runtime.timers().restart(id, period))
}

fn free_timer(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    tolerate("FreeTimer", raw, |id| ctx.runtime.timers().free(id))
}

/// Unknown and freed timers count as elapsed.
fn is_timer_elapsed(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let raw = int_arg(args, 0)?;
    let Some(id) = TimerId::from_raw(raw) else {
        return Ok(ScriptValue::Bool(true));
    };
    match ctx.runtime.timers().is_elapsed(id) {
        Ok(elapsed) => Ok(ScriptValue::Bool(elapsed)),
        Err(e) => {
            debug!("IsTimerElapsed: {}", e);
            Ok(ScriptValue::Bool(true))
        }
    }
}

fn tolerate<F>(operation: &str, raw: i64, apply: F) -> Result<ScriptValue, NativeError>
where
    F: FnOnce(TimerId) -> Result<(), TimerError>,
{
    let result = match TimerId::from_raw(raw) {
        Some(id) => apply(id),
        None => Err(TimerError::NotFound(raw)),
    };
    match result {
        Ok(()) => Ok(ScriptValue::Nil),
        Err(e @ (TimerError::NotFound(_) | TimerError::Freed(_))) => {
            debug!("{}: {}", operation, e);
            Ok(ScriptValue::Nil)
        }
        Err(e) => Err(e.into()),
    }
}
