//! # Function Registry
//!
//! Name-indexed table of every function callable across the script boundary.
//!
//! Native entries are Rust closures registered by the feature modules in
//! [`crate::api`] during startup. Script entries are published at runtime
//! through `MakePublic` and are executed by the engine that owns the module.
//! Both origins share one namespace, and a name can only be registered once.

use crate::engine::{ModuleRef, ScriptTarget};
use crate::error::{NativeError, RegistryError};
use crate::marshal::{self, Arguments};
use crate::runtime::CallContext;
use crate::value::{ScriptValue, Signature};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Native entry point. Receives validated arguments, never the raw list.
pub type NativeFn =
    Arc<dyn Fn(&CallContext<'_>, &Arguments) -> Result<ScriptValue, NativeError> + Send + Sync>;

/// Which runtime executes a registered function.
#[derive(Clone)]
pub enum Origin {
    Native(NativeFn),
    Script(ScriptTarget),
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Native(_) => f.write_str("Native"),
            Origin::Script(target) => write!(f, "Script({target})"),
        }
    }
}

/// An immutable registry entry.
#[derive(Debug, Clone)]
pub struct ExportedFunction {
    pub name: String,
    pub signature: Signature,
    pub origin: Origin,
}

impl ExportedFunction {
    pub fn is_native(&self) -> bool {
        matches!(self.origin, Origin::Native(_))
    }
}

/// Concurrent name → function table.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<ExportedFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is taken, by
    /// either a native or a script function.
    pub fn register(
        &self,
        name: &str,
        origin: Origin,
        signature: Signature,
    ) -> Result<Arc<ExportedFunction>, RegistryError> {
        use dashmap::mapref::entry::Entry;

        match self.functions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateName(name.to_string())),
            Entry::Vacant(slot) => {
                let function = Arc::new(ExportedFunction {
                    name: name.to_string(),
                    signature,
                    origin,
                });
                slot.insert(function.clone());
                debug!("📝 Registered function '{}' {}", name, function.signature);
                Ok(function)
            }
        }
    }

    /// Convenience wrapper for registering a native closure.
    pub fn register_native<F>(
        &self,
        name: &str,
        signature: Signature,
        entry: F,
    ) -> Result<Arc<ExportedFunction>, RegistryError>
    where
        F: Fn(&CallContext<'_>, &Arguments) -> Result<ScriptValue, NativeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Origin::Native(Arc::new(entry)), signature)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ExportedFunction>, RegistryError> {
        self.functions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// All registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All native entries, used by engines to expose them to scripts.
    pub fn natives(&self) -> Vec<Arc<ExportedFunction>> {
        let mut natives: Vec<_> = self
            .functions
            .iter()
            .filter(|e| e.value().is_native())
            .map(|e| e.value().clone())
            .collect();
        natives.sort_by(|a, b| a.name.cmp(&b.name));
        natives
    }

    /// Unregisters every function published by `module`.
    pub fn remove_script_functions(&self, module: ModuleRef) -> usize {
        let before = self.functions.len();
        self.functions.retain(|_, function| match &function.origin {
            Origin::Script(target) => target.module_ref() != module,
            Origin::Native(_) => true,
        });
        before - self.functions.len()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Looks up `name`, validates `raw` against its signature, executes it
    /// and coerces the result to the declared return tag.
    ///
    /// No registry lock is held while the function runs, so the callee may
    /// register further functions or call back into the registry.
    pub fn call_by_name(
        &self,
        ctx: &CallContext<'_>,
        name: &str,
        raw: &[ScriptValue],
    ) -> Result<ScriptValue, RegistryError> {
        let function = self.lookup(name)?;
        let arguments = marshal::unpack(raw, &function.signature.params)?;

        let result = match &function.origin {
            Origin::Native(entry) => (**entry)(ctx, &arguments),
            Origin::Script(target) => ctx
                .runtime
                .invoke(target, &marshal::pack(&arguments))
                .map_err(NativeError::from),
        }
        .map_err(|source| RegistryError::CallFailed {
            name: name.to_string(),
            source: Box::new(source),
        })?;

        let found = result.tag();
        marshal::coerce_return(result, function.signature.returns).map_err(|_| {
            RegistryError::ReturnMismatch {
                name: name.to_string(),
                expected: function.signature.returns,
                found,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeOptions};
    use crate::value::TypeTag;

    fn sig(ret: char, params: &str) -> Signature {
        Signature::parse(ret, params).unwrap()
    }

    #[test]
    fn test_register_then_lookup() {
        let registry = FunctionRegistry::new();
        registry
            .register_native("Add", sig('i', "ii"), |_, args| {
                Ok(ScriptValue::Int(args.int(0).unwrap_or(0) + args.int(1).unwrap_or(0)))
            })
            .unwrap();

        let found = registry.lookup("Add").unwrap();
        assert_eq!(found.name, "Add");
        assert_eq!(found.signature, sig('i', "ii"));
        assert!(found.is_native());
        assert!(matches!(registry.lookup("add"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = FunctionRegistry::new();
        registry
            .register_native("Ping", sig('v', ""), |_, _| Ok(ScriptValue::Nil))
            .unwrap();

        let script = ScriptTarget {
            engine: 0,
            module: 0,
            function: "ping".into(),
        };
        let result = registry.register("Ping", Origin::Script(script), sig('v', ""));
        assert_eq!(result.unwrap_err(), RegistryError::DuplicateName("Ping".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_call_by_name() {
        let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
        let ctx = CallContext::new(&runtime, None);
        let registry = FunctionRegistry::new();
        registry
            .register_native("Half", sig('f', "f"), |_, args| {
                Ok(ScriptValue::Float(args.float(0).unwrap_or(0.0) / 2.0))
            })
            .unwrap();

        // integer argument widens to float
        let result = registry.call_by_name(&ctx, "Half", &[ScriptValue::Int(5)]).unwrap();
        assert_eq!(result, ScriptValue::Float(2.5));

        let missing = registry.call_by_name(&ctx, "Double", &[]);
        assert_eq!(missing.unwrap_err(), RegistryError::NotFound("Double".into()));

        let arity = registry.call_by_name(&ctx, "Half", &[]);
        assert!(matches!(arity, Err(RegistryError::Marshal(_))));
    }

    #[test]
    fn test_return_value_checked() {
        let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
        let ctx = CallContext::new(&runtime, None);
        let registry = FunctionRegistry::new();
        registry
            .register_native("Liar", sig('i', ""), |_, _| Ok(ScriptValue::Str("no".into())))
            .unwrap();
        registry
            .register_native("Flag", sig('b', ""), |_, _| Ok(ScriptValue::Int(1)))
            .unwrap();

        assert!(matches!(
            registry.call_by_name(&ctx, "Liar", &[]),
            Err(RegistryError::ReturnMismatch { expected: TypeTag::Int, found: TypeTag::Str, .. })
        ));
        assert_eq!(registry.call_by_name(&ctx, "Flag", &[]), Ok(ScriptValue::Bool(true)));
    }

    #[test]
    fn test_native_failure_is_wrapped() {
        let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
        let ctx = CallContext::new(&runtime, None);
        let registry = FunctionRegistry::new();
        registry
            .register_native("Fail", sig('v', ""), |_, _| {
                Err(NativeError::InvalidArgument("nope".into()))
            })
            .unwrap();

        match registry.call_by_name(&ctx, "Fail", &[]) {
            Err(RegistryError::CallFailed { name, source }) => {
                assert_eq!(name, "Fail");
                assert_eq!(*source, NativeError::InvalidArgument("nope".into()));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
