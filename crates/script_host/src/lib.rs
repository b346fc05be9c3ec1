//! # Script Host
//!
//! Concrete script engines and the [`ScriptManager`] that loads the server's
//! script modules at startup.
//!
//! Engines must be created after every native has been registered in the
//! [`Runtime`](script_bridge::Runtime), since each engine captures the native
//! table when it is built.

pub mod error;
pub mod manager;
pub mod rhai_engine;

pub use error::ScriptHostError;
pub use manager::ScriptManager;
pub use rhai_engine::RhaiEngine;
