//! Error types for the script host.

use script_bridge::ScriptError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptHostError {
    #[error("Script loading error: {0}")]
    LoadingError(#[from] ScriptError),

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Script already loaded: {0}")]
    ScriptAlreadyLoaded(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
