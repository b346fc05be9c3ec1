//! # Script Bridge
//!
//! The boundary between the statically-typed server and dynamically-typed
//! script engines.
//!
//! ## Components
//!
//! - [`value`] / [`marshal`]: the [`ScriptValue`] union and descriptor-driven
//!   argument validation
//! - [`FunctionRegistry`]: natives and script-published functions under one
//!   namespace
//! - [`CallbackRegistry`]: ordered event handlers with veto semantics
//! - [`TimerSubsystem`]: generational timers advanced once per tick
//! - [`Runtime`]: owns all of the above plus the engines and player roster
//! - [`api`]: the built-in natives every script can call
//!
//! ## Example
//!
//! ```rust
//! use script_bridge::{Runtime, RuntimeOptions, ScriptValue};
//!
//! let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
//! runtime.player_connected(1);
//! let count = runtime.call_native("GetPlayerCount", &[]).unwrap();
//! assert_eq!(count, ScriptValue::Int(1));
//! ```

pub mod api;
pub mod callbacks;
pub mod control;
pub mod engine;
pub mod error;
pub mod functions;
pub mod marshal;
pub mod runtime;
pub mod timers;
pub mod value;

pub use callbacks::{CallbackRegistry, Dispatched, ServerEvent};
pub use control::{ServerCommand, ServerControl};
pub use engine::{DefinedFunction, EngineId, ModuleExports, ModuleId, ModuleRef, ScriptEngine, ScriptTarget};
pub use error::{MarshalError, NativeError, RegistryError, ScriptError, TimerError};
pub use functions::{ExportedFunction, FunctionRegistry, NativeFn, Origin};
pub use marshal::{pack, unpack, Arguments};
pub use runtime::{CallContext, Runtime, RuntimeOptions, TickReport};
pub use timers::{FireJob, TimerId, TimerMode, TimerSubsystem};
pub use value::{PlayerId, ScriptValue, Signature, TypeDescriptor, TypeTag};

/// Version of the client/server message protocol, reported to clients and
/// to the master server.
pub const PROTOCOL_VERSION: u32 = 1;
