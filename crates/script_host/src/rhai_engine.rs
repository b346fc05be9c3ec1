//! Rhai implementation of [`ScriptEngine`].
//!
//! Every native registered in the runtime at construction time becomes a Rhai
//! function taking dynamically-typed arguments. Calls are forwarded to
//! [`Runtime::call_native`], so argument validation and coercion happen in
//! one place for all engines. Native failures surface as Rhai runtime errors
//! that scripts can catch with `try`/`catch`.

use rhai::module_resolvers::FileModuleResolver;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, NativeCallContext, Position, Scope, AST};
use script_bridge::{
    DefinedFunction, ModuleExports, ModuleId, Runtime, ScriptEngine, ScriptError, ScriptValue,
};
use std::any::TypeId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, info, trace};

/// Upper bound on operations per script call; keeps a runaway loop from
/// stalling the server tick forever.
pub const DEFAULT_MAX_OPERATIONS: u64 = 10_000_000;
pub const DEFAULT_MAX_CALL_LEVELS: usize = 64;

/// Rhai-backed script engine.
pub struct RhaiEngine {
    engine: Engine,
    modules: RwLock<HashMap<ModuleId, Arc<AST>>>,
}

impl RhaiEngine {
    /// Builds an engine exposing every native currently registered in
    /// `runtime`. Imports are resolved relative to `search_root`.
    pub fn new(runtime: &Arc<Runtime>, search_root: &Path) -> Self {
        Self::with_limits(runtime, search_root, DEFAULT_MAX_OPERATIONS, DEFAULT_MAX_CALL_LEVELS)
    }

    pub fn with_limits(
        runtime: &Arc<Runtime>,
        search_root: &Path,
        max_operations: u64,
        max_call_levels: usize,
    ) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(max_operations);
        engine.set_max_call_levels(max_call_levels);
        engine.set_module_resolver(FileModuleResolver::new_with_path(search_root));
        engine.on_print(|text| info!(target: "script", "{}", text));
        engine.on_debug(|text, source, position| {
            debug!(target: "script", "[{}:{}] {}", source.unwrap_or("?"), position, text)
        });

        let natives = runtime.functions().natives();
        for native in &natives {
            register_native(&mut engine, Arc::downgrade(runtime), &native.name, native.signature.arity());
        }
        debug!("🔧 Rhai engine exposes {} natives", natives.len());

        Self {
            engine,
            modules: RwLock::new(HashMap::new()),
        }
    }

    fn module(&self, module: ModuleId) -> Option<Arc<AST>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&module)
            .cloned()
    }
}

/// Registers `name` as a Rhai function forwarding to the runtime.
fn register_native(engine: &mut Engine, runtime: Weak<Runtime>, name: &str, arity: usize) {
    let native = name.to_string();
    engine.register_raw_fn(
        name,
        vec![TypeId::of::<Dynamic>(); arity],
        move |_ctx: NativeCallContext, args: &mut [&mut Dynamic]| -> Result<Dynamic, Box<EvalAltResult>> {
            let runtime = runtime
                .upgrade()
                .ok_or_else(|| raise("server runtime is shutting down"))?;
            let raw: Vec<ScriptValue> = args.iter().map(|arg| from_dynamic(arg)).collect();
            trace!("➡️ {}({:?})", native, raw);
            runtime
                .call_native(&native, &raw)
                .map(to_dynamic)
                .map_err(|e| raise(e.to_string()))
        },
    );
}

fn raise(message: impl Into<String>) -> Box<EvalAltResult> {
    let message: String = message.into();
    EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE).into()
}

/// Converts a Rhai value into the boundary representation.
///
/// Characters become one-character strings; maps and custom types are
/// rendered as text.
pub fn from_dynamic(value: &Dynamic) -> ScriptValue {
    if value.is_unit() {
        return ScriptValue::Nil;
    }
    if let Ok(b) = value.as_bool() {
        return ScriptValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return ScriptValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return ScriptValue::Float(f);
    }
    if let Ok(c) = value.as_char() {
        return ScriptValue::Str(c.to_string());
    }
    if value.is_string() {
        return ScriptValue::Str(value.clone().into_string().unwrap_or_default());
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return ScriptValue::Array(items.iter().map(from_dynamic).collect());
    }
    ScriptValue::Str(value.to_string())
}

pub fn to_dynamic(value: ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Nil => Dynamic::UNIT,
        ScriptValue::Bool(b) => Dynamic::from_bool(b),
        ScriptValue::Int(i) => Dynamic::from_int(i),
        ScriptValue::Float(f) => Dynamic::from_float(f),
        ScriptValue::Str(s) => Dynamic::from(s),
        ScriptValue::Array(items) => Dynamic::from_array(items.into_iter().map(to_dynamic).collect()),
    }
}

impl ScriptEngine for RhaiEngine {
    fn name(&self) -> &str {
        "rhai"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "rhai")
    }

    fn load_module(
        &self,
        module: ModuleId,
        path: &Path,
        search_root: &Path,
    ) -> Result<ModuleExports, ScriptError> {
        let full_path = if path.is_relative() {
            search_root.join(path)
        } else {
            path.to_path_buf()
        };
        let load_error = |reason: String| ScriptError::Load {
            path: full_path.display().to_string(),
            reason,
        };

        let ast = self
            .engine
            .compile_file(full_path.clone())
            .map_err(|e| load_error(e.to_string()))?;

        let exports = ModuleExports {
            functions: ast
                .iter_functions()
                .map(|f| DefinedFunction {
                    name: f.name.to_string(),
                    arity: f.params.len(),
                })
                .collect(),
        };

        // published before running so top-level code can call back into it
        let ast = Arc::new(ast);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module, ast.clone());

        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| load_error(e.to_string()))?;

        Ok(exports)
    }

    fn unload_module(&self, module: ModuleId) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&module);
    }

    fn invoke(
        &self,
        module: ModuleId,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError> {
        let ast = self.module(module).ok_or_else(|| ScriptError::MissingFunction {
            module: module.to_string(),
            function: function.to_string(),
        })?;

        let args: Vec<Dynamic> = args.iter().cloned().map(to_dynamic).collect();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let mut scope = Scope::new();

        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &ast, function, args)
            .map(|value| from_dynamic(&value))
            .map_err(|e| match *e {
                EvalAltResult::ErrorFunctionNotFound(..) => ScriptError::MissingFunction {
                    module: module.to_string(),
                    function: function.to_string(),
                },
                other => ScriptError::Runtime {
                    function: function.to_string(),
                    reason: other.to_string(),
                },
            })
    }
}
