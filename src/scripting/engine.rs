/// `scripting/engine.rs` — Lua VM manager
///
/// `ScriptEngine` runs scripts against the `libsox` module.
/// Each run gets its own sandboxed Lua VM; the loaded libsox is shared.
/// Output from log.* is captured and returned with the run result.

use std::{
    path::Path,
    rc::Rc,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use super::{
    api::{register_all, ScriptLog},
    sandbox::create_sandboxed_vm,
};
use crate::{config::BindingConfig, sox::SoxLoader};

// ── Script run result ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRunResult {
    pub success: bool,
    pub output: Vec<String>,
    pub error: Option<String>,
    pub error_line: Option<u32>,
}

impl ScriptRunResult {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            output: vec![],
            error: Some(error),
            error_line: None,
        }
    }
}

// ── ScriptEngine ──────────────────────────────────────────────────────────────

pub struct ScriptEngine {
    config: BindingConfig,
    loader: Rc<SoxLoader>,
}

impl ScriptEngine {
    pub fn new(config: BindingConfig) -> Self {
        let loader = Rc::new(SoxLoader::new(config.library_path.clone()));
        Self { config, loader }
    }

    /// Read and run a script file.
    pub fn run_file(&self, path: &Path) -> ScriptRunResult {
        match std::fs::read_to_string(path) {
            Ok(content) => self.run_source(&path.display().to_string(), &content),
            Err(e) => ScriptRunResult::failed(format!("Cannot read {}: {e}", path.display())),
        }
    }

    /// Run `content` in a fresh sandboxed VM. `name` labels error messages.
    pub fn run_source(&self, name: &str, content: &str) -> ScriptRunResult {
        let lua = match create_sandboxed_vm(self.config.trust) {
            Ok(l) => l,
            Err(e) => return ScriptRunResult::failed(format!("Failed to create Lua VM: {e}")),
        };

        let log_sink: ScriptLog = Arc::new(Mutex::new(Vec::new()));
        if let Err(e) = register_all(
            &lua,
            Arc::clone(&log_sink),
            Rc::clone(&self.loader),
            self.config.default_buffer_size,
        ) {
            return ScriptRunResult::failed(format!("API registration failed: {e}"));
        }

        log::debug!("Running script {name}");
        let outcome = lua.load(content).set_name(format!("@{name}")).exec();

        let output: Vec<String> = log_sink
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| format!("[{}] {}", e.level, e.message))
                    .collect()
            })
            .unwrap_or_default();

        match outcome {
            Ok(()) => ScriptRunResult {
                success: true,
                output,
                error: None,
                error_line: None,
            },
            Err(e) => {
                let error_str = e.to_string();
                log::warn!("Script {name} failed: {error_str}");
                ScriptRunResult {
                    success: false,
                    output,
                    error_line: parse_error_line(&error_str),
                    error: Some(error_str),
                }
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse a line number from an mlua error message (e.g. `script.lua:5: ...`).
///
/// Takes the first `:<digits>:` segment, so chunk names containing colons
/// (Windows paths) do not confuse it.
fn parse_error_line(err: &str) -> Option<u32> {
    let parts: Vec<&str> = err.split(':').collect();
    parts
        .windows(2)
        .find(|w| !w[0].is_empty() && !w[1].is_empty() && w[1].chars().all(|c| c.is_ascii_digit()))
        .and_then(|w| w[1].parse().ok())
}
