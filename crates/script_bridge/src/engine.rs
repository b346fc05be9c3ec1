//! Script engine abstraction.
//!
//! The runtime never depends on a concrete scripting language. Engines are
//! registered with the [`Runtime`](crate::Runtime) and selected per module
//! file through [`ScriptEngine::handles`].

use crate::error::ScriptError;
use crate::value::ScriptValue;
use std::fmt;
use std::path::Path;

/// Index of an engine inside the runtime.
pub type EngineId = usize;

/// Index of a loaded script module inside the runtime.
pub type ModuleId = usize;

/// A loaded module, identified by the engine that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    pub engine: EngineId,
    pub module: ModuleId,
}

impl ModuleRef {
    /// Builds a target for a function defined in this module.
    pub fn target(&self, function: impl Into<String>) -> ScriptTarget {
        ScriptTarget {
            engine: self.engine,
            module: self.module,
            function: function.into(),
        }
    }
}

/// A callable script-side entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptTarget {
    pub engine: EngineId,
    pub module: ModuleId,
    pub function: String,
}

impl ScriptTarget {
    pub fn module_ref(&self) -> ModuleRef {
        ModuleRef {
            engine: self.engine,
            module: self.module,
        }
    }
}

impl fmt::Display for ScriptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.function, self.engine, self.module)
    }
}

/// A function defined by a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedFunction {
    pub name: String,
    pub arity: usize,
}

/// Everything a module defines that the runtime may bind to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleExports {
    pub functions: Vec<DefinedFunction>,
}

/// A scripting language implementation.
///
/// Engines are driven exclusively from the server loop task, but they are
/// stored behind `Arc` in the shared runtime and must therefore be
/// `Send + Sync`. Implementations must not hold internal locks while
/// executing script code: a script may call a native that re-enters the same
/// engine (for instance through `CallPublic`).
pub trait ScriptEngine: Send + Sync {
    /// Short engine name used in logs.
    fn name(&self) -> &str;

    /// Whether this engine can load the module at `path`.
    fn handles(&self, path: &Path) -> bool;

    /// Compiles and initialises the module at `path`.
    ///
    /// Top-level statements run during this call, so the module may already
    /// call natives. `search_root` resolves the module's own imports.
    fn load_module(
        &self,
        module: ModuleId,
        path: &Path,
        search_root: &Path,
    ) -> Result<ModuleExports, ScriptError>;

    /// Forgets `module` after its load failed.
    fn unload_module(&self, _module: ModuleId) {}

    /// Invokes `function` in a previously loaded `module`.
    fn invoke(
        &self,
        module: ModuleId,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError>;
}
