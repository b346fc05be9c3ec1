//! Script manager: discovers and loads the server's script modules.

use crate::error::ScriptHostError;
use dashmap::DashMap;
use script_bridge::{ModuleRef, Runtime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Loads script modules from `<home>/scripts` into a [`Runtime`].
///
/// Scripts are loaded in the configured order. Callback handlers of earlier
/// scripts run before those of later ones, so the order is significant.
pub struct ScriptManager {
    runtime: Arc<Runtime>,
    home: PathBuf,
    loaded_scripts: DashMap<String, ModuleRef>,
}

impl ScriptManager {
    /// Creates a new script manager.
    ///
    /// # Arguments
    ///
    /// * `runtime` - The runtime that receives the scripts' callbacks
    /// * `home` - Plugin home directory; scripts live in its `scripts` folder
    pub fn new(runtime: Arc<Runtime>, home: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            home: home.into(),
            loaded_scripts: DashMap::new(),
        }
    }

    /// Directory scripts are loaded from, also the import search root.
    pub fn scripts_dir(&self) -> PathBuf {
        self.home.join("scripts")
    }

    /// Loads every script named in `scripts`, in order.
    ///
    /// An empty list loads every file in the scripts directory that a
    /// registered engine can handle, sorted by file name.
    ///
    /// # Returns
    ///
    /// The number of scripts loaded, or the first failure. A script that
    /// fails to load aborts the whole operation: running with part of the
    /// game logic missing is never intended.
    pub fn load_scripts(&self, scripts: &[String]) -> Result<usize, ScriptHostError> {
        let dir = self.scripts_dir();
        info!("📜 Loading scripts from: {}", dir.display());

        let names = if scripts.is_empty() {
            self.discover_scripts(&dir)?
        } else {
            scripts.to_vec()
        };

        if names.is_empty() {
            warn!("📂 No scripts to load, the server will run with default behaviour only");
            return Ok(0);
        }

        for name in &names {
            if let Err(e) = self.load_script(name) {
                error!("❌ Failed to load script {}: {}", name, e);
                return Err(e);
            }
        }

        info!("🎉 Script loading complete: {} script(s) loaded", names.len());
        Ok(names.len())
    }

    /// Loads one script by its file name relative to the scripts directory.
    pub fn load_script(&self, name: &str) -> Result<ModuleRef, ScriptHostError> {
        if self.loaded_scripts.contains_key(name) {
            return Err(ScriptHostError::ScriptAlreadyLoaded(name.to_string()));
        }

        let dir = self.scripts_dir();
        let path = dir.join(name);
        if !path.is_file() {
            return Err(ScriptHostError::ScriptNotFound(path.display().to_string()));
        }

        let module = self.runtime.load_script(&path, &dir)?;
        self.loaded_scripts.insert(name.to_string(), module);
        info!("✅ Successfully loaded script: {}", name);
        Ok(module)
    }

    fn discover_scripts(&self, dir: &Path) -> Result<Vec<String>, ScriptHostError> {
        if !dir.is_dir() {
            warn!("Script directory does not exist: {}", dir.display());
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || !self.runtime.can_load(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        info!("🔍 Found {} script file(s)", names.len());
        Ok(names)
    }

    pub fn script_count(&self) -> usize {
        self.loaded_scripts.len()
    }

    /// Loaded script names, sorted.
    pub fn script_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loaded_scripts
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_script_loaded(&self, name: &str) -> bool {
        self.loaded_scripts.contains_key(name)
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }
}
