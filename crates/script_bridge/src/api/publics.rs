//! Script-published functions.
//!
//! `MakePublic` lets a module export one of its own functions under a global
//! name so that other modules can reach it through `CallPublic`.

use super::{array_arg, str_arg};
use crate::error::{NativeError, RegistryError};
use crate::functions::{FunctionRegistry, Origin};
use crate::marshal::Arguments;
use crate::runtime::CallContext;
use crate::value::{ScriptValue, Signature, TypeTag};
use tracing::info;

pub fn register(functions: &FunctionRegistry) -> Result<(), RegistryError> {
    functions.register_native("MakePublic", Signature::parse('v', "ssss")?, make_public)?;
    functions.register_native(
        "CallPublic",
        Signature::new(TypeTag::Any, &[TypeTag::Str, TypeTag::Array]),
        call_public,
    )?;
    Ok(())
}

/// `MakePublic(function, name, ret, def)`
fn make_public(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let caller = ctx.require_caller()?;
    let function = str_arg(args, 0)?;
    let name = str_arg(args, 1)?;
    let ret = str_arg(args, 2)?;
    let def = str_arg(args, 3)?;

    let mut chars = ret.chars();
    let ret = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => {
            return Err(NativeError::InvalidArgument(format!(
                "return type must be a single tag, got '{ret}'"
            )))
        }
    };
    let signature = Signature::parse(ret, def)?;

    ctx.runtime
        .functions()
        .register(name, Origin::Script(caller.target(function)), signature)?;
    info!("🌐 Published '{}' as '{}'", function, name);
    Ok(ScriptValue::Nil)
}

/// `CallPublic(name, args)` forwards `args` to whatever `name` resolves to.
///
/// The forwarded call gets the same soft-failure handling as a direct one.
fn call_public(ctx: &CallContext<'_>, args: &Arguments) -> Result<ScriptValue, NativeError> {
    let name = str_arg(args, 0)?;
    let forwarded = array_arg(args, 1)?;
    Ok(ctx.runtime.call_native(name, forwarded)?)
}
