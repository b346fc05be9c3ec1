//! # Runtime
//!
//! The single owner of all state shared across the script boundary: the
//! function and callback registries, the timer subsystem, the registered
//! script engines, the connected-player roster and the server control queue.
//!
//! One `Runtime` is built at startup and handed out as `Arc<Runtime>`. All
//! script execution happens on the server loop task, so the locks below are
//! never contended in practice; they exist so the type is `Send + Sync` and
//! they are never held while script code runs.

use crate::api;
use crate::callbacks::{CallbackRegistry, Dispatched, ServerEvent};
use crate::control::ServerControl;
use crate::engine::{EngineId, ModuleId, ModuleRef, ScriptEngine, ScriptTarget};
use crate::error::{MarshalError, NativeError, RegistryError, ScriptError};
use crate::functions::FunctionRegistry;
use crate::timers::TimerSubsystem;
use crate::value::{PlayerId, ScriptValue};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Static facts about the server exposed to scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub max_players: usize,
    pub server_version: String,
    pub protocol_version: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_players: 64,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: crate::PROTOCOL_VERSION,
        }
    }
}

/// Result of one timer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: usize,
    pub failures: usize,
}

/// Who is calling a native, and through which runtime.
pub struct CallContext<'a> {
    pub runtime: &'a Runtime,
    /// Module whose code is currently executing, if any
    pub caller: Option<ModuleRef>,
}

impl<'a> CallContext<'a> {
    pub fn new(runtime: &'a Runtime, caller: Option<ModuleRef>) -> Self {
        Self { runtime, caller }
    }

    /// The calling module, required by natives that name script functions.
    pub fn require_caller(&self) -> Result<ModuleRef, NativeError> {
        self.caller.ok_or_else(|| {
            NativeError::InvalidArgument("this function can only be called from a script".into())
        })
    }

    /// Validates a script-supplied player id against the connected roster.
    pub fn connected_player(&self, raw: i64) -> Result<PlayerId, NativeError> {
        let pid = PlayerId::try_from(raw)
            .map_err(|_| NativeError::InvalidArgument(format!("{raw} is not a player id")))?;
        if self.runtime.is_player_connected(pid) {
            Ok(pid)
        } else {
            Err(NativeError::PlayerNotConnected(pid))
        }
    }
}

#[derive(Debug)]
struct LoadedModule {
    path: PathBuf,
}

/// Process-wide script runtime.
pub struct Runtime {
    options: RuntimeOptions,
    functions: FunctionRegistry,
    callbacks: CallbackRegistry,
    timers: Mutex<TimerSubsystem>,
    engines: RwLock<Vec<Arc<dyn ScriptEngine>>>,
    /// `None` marks a module whose load failed; ids are never reused
    modules: RwLock<Vec<Option<LoadedModule>>>,
    call_stack: Mutex<Vec<ModuleRef>>,
    control: ServerControl,
    players: RwLock<BTreeSet<PlayerId>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .field("functions", &self.functions.len())
            .field("engines", &self.read(&self.engines).len())
            .field("modules", &self.module_count())
            .finish()
    }
}

impl Runtime {
    /// Builds a runtime with every built-in native registered.
    ///
    /// # Errors
    ///
    /// Fails only if two built-in natives share a name.
    pub fn new(options: RuntimeOptions) -> Result<Arc<Self>, RegistryError> {
        let runtime = Self {
            options,
            functions: FunctionRegistry::new(),
            callbacks: CallbackRegistry::new(),
            timers: Mutex::new(TimerSubsystem::new()),
            engines: RwLock::new(Vec::new()),
            modules: RwLock::new(Vec::new()),
            call_stack: Mutex::new(Vec::new()),
            control: ServerControl::new(),
            players: RwLock::new(BTreeSet::new()),
        };
        api::register_all(&runtime.functions)?;
        debug!("📚 Registered {} native functions", runtime.functions.len());
        Ok(Arc::new(runtime))
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn control(&self) -> &ServerControl {
        &self.control
    }

    /// Exclusive access to the timers. Never call script code while holding it.
    pub fn timers(&self) -> MutexGuard<'_, TimerSubsystem> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<'l, T>(&self, lock: &'l RwLock<T>) -> RwLockReadGuard<'l, T> {
        lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<'l, T>(&self, lock: &'l RwLock<T>) -> RwLockWriteGuard<'l, T> {
        lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn call_stack(&self) -> MutexGuard<'_, Vec<ModuleRef>> {
        self.call_stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- engines and modules ----

    pub fn add_engine(&self, engine: Arc<dyn ScriptEngine>) -> EngineId {
        let mut engines = self.write(&self.engines);
        info!("🧩 Registered script engine '{}'", engine.name());
        engines.push(engine);
        engines.len() - 1
    }

    fn engine(&self, id: EngineId) -> Result<Arc<dyn ScriptEngine>, ScriptError> {
        self.read(&self.engines)
            .get(id)
            .cloned()
            .ok_or(ScriptError::EngineGone(id))
    }

    /// Whether any registered engine can load `path`.
    pub fn can_load(&self, path: &Path) -> bool {
        self.read(&self.engines).iter().any(|engine| engine.handles(path))
    }

    /// Number of successfully loaded modules.
    pub fn module_count(&self) -> usize {
        self.read(&self.modules).iter().flatten().count()
    }

    pub fn module_path(&self, module: ModuleId) -> Option<PathBuf> {
        self.read(&self.modules)
            .get(module)
            .and_then(Option::as_ref)
            .map(|m| m.path.clone())
    }

    /// Loads a script module with the first engine that handles `path`, then
    /// binds every event handler the module defines.
    ///
    /// Functions named after an event but declaring the wrong number of
    /// parameters are skipped with a warning.
    ///
    /// If the module fails to load, everything its top-level code left
    /// behind is rolled back: published functions are unregistered, its
    /// timers are freed and the engine drops the module.
    pub fn load_script(&self, path: &Path, search_root: &Path) -> Result<ModuleRef, ScriptError> {
        let (engine_id, engine) = self
            .read(&self.engines)
            .iter()
            .enumerate()
            .find(|(_, engine)| engine.handles(path))
            .map(|(id, engine)| (id, engine.clone()))
            .ok_or_else(|| ScriptError::UnsupportedModule(path.display().to_string()))?;

        let module = {
            let mut modules = self.write(&self.modules);
            modules.push(Some(LoadedModule {
                path: path.to_path_buf(),
            }));
            modules.len() - 1
        };
        let module_ref = ModuleRef {
            engine: engine_id,
            module,
        };

        let loaded = {
            let _frame = CallFrame::enter(self, module_ref);
            engine.load_module(module, path, search_root)
        };
        let exports = match loaded {
            Ok(exports) => exports,
            Err(e) => {
                self.discard_module(module_ref, engine.as_ref());
                return Err(e);
            }
        };

        for function in &exports.functions {
            let Some(event) = ServerEvent::from_name(&function.name) else {
                continue;
            };
            let expected = event.signature().arity();
            if function.arity == expected {
                self.callbacks.bind(event, module_ref.target(&function.name));
            } else {
                warn!(
                    "⚠️ {} in {} takes {} parameters, expected {}; not bound",
                    function.name,
                    path.display(),
                    function.arity,
                    expected
                );
            }
        }

        info!(
            "📜 Loaded script {} ({} functions) with {}",
            path.display(),
            exports.functions.len(),
            engine.name()
        );
        Ok(module_ref)
    }

    fn discard_module(&self, module_ref: ModuleRef, engine: &dyn ScriptEngine) {
        if let Some(slot) = self.write(&self.modules).get_mut(module_ref.module) {
            *slot = None;
        }
        let functions = self.functions.remove_script_functions(module_ref);
        let timers = self.timers().free_module(module_ref);
        engine.unload_module(module_ref.module);
        debug!(
            "🗑️ Discarded module {} ({} published functions, {} timers)",
            module_ref.module, functions, timers
        );
    }

    /// Runs a script function. The target's module is the caller seen by any
    /// native the function calls.
    pub fn invoke(&self, target: &ScriptTarget, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        let engine = self.engine(target.engine)?;
        let _frame = CallFrame::enter(self, target.module_ref());
        engine.invoke(target.module, &target.function, args)
    }

    /// Module whose code is currently running, if any.
    pub fn caller(&self) -> Option<ModuleRef> {
        self.call_stack().last().copied()
    }

    /// Entry point used by engines when a script calls a registered function.
    ///
    /// A call that fails only because it named a player who is not connected
    /// is logged and answered with the default value of the function's
    /// return type. Every other failure is returned to the engine, which
    /// raises it inside the script.
    pub fn call_native(&self, name: &str, raw: &[ScriptValue]) -> Result<ScriptValue, RegistryError> {
        let ctx = CallContext::new(self, self.caller());
        match self.functions.call_by_name(&ctx, name, raw) {
            Err(RegistryError::CallFailed { name, source }) if source.is_soft() => {
                warn!("⚠️ {}: {}", name, source);
                let returns = self.functions.lookup(&name)?.signature.returns;
                Ok(ScriptValue::default_for(returns))
            }
            other => other,
        }
    }

    /// Dispatches `event` to every bound handler.
    pub fn dispatch(&self, event: ServerEvent, raw: &[ScriptValue]) -> Result<Dispatched, MarshalError> {
        self.callbacks
            .dispatch(event, raw, |target, args| self.invoke(target, args))
    }

    /// Advances all timers by `elapsed` milliseconds and runs due callbacks.
    ///
    /// The timer lock is released around every callback, so callbacks may
    /// freely create, stop or free timers.
    pub fn tick_timers(&self, elapsed: i64) -> TickReport {
        self.timers().begin_tick(elapsed);

        let mut report = TickReport::default();
        loop {
            let job = self.timers().next_fire();
            let Some(job) = job else {
                break;
            };
            report.fired += 1;
            if let Err(e) = self.invoke(&job.callback, &job.args) {
                report.failures += 1;
                error!("❌ Timer {} callback {} failed: {}", job.id, job.callback, e);
            }
        }

        self.timers().end_tick();
        report
    }

    // ---- players ----

    /// Records a new session. Returns false if the id was already present.
    pub fn player_connected(&self, pid: PlayerId) -> bool {
        self.write(&self.players).insert(pid)
    }

    pub fn player_disconnected(&self, pid: PlayerId) -> bool {
        self.write(&self.players).remove(&pid)
    }

    pub fn is_player_connected(&self, pid: PlayerId) -> bool {
        self.read(&self.players).contains(&pid)
    }

    pub fn player_count(&self) -> usize {
        self.read(&self.players).len()
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.read(&self.players).iter().copied().collect()
    }

    pub fn max_players(&self) -> usize {
        self.options.max_players
    }
}

/// Keeps the calling module on the call stack for the duration of a call.
struct CallFrame<'a> {
    runtime: &'a Runtime,
}

impl<'a> CallFrame<'a> {
    fn enter(runtime: &'a Runtime, module: ModuleRef) -> Self {
        runtime.call_stack().push(module);
        Self { runtime }
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        self.runtime.call_stack().pop();
    }
}
