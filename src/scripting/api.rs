/// `scripting/api.rs` — registers all Lua globals for a script run
///
/// Provides the API surface to each script VM:
///   libsox, log

use mlua::{Lua, Result as LuaResult};
use std::{
    rc::Rc,
    sync::{Arc, Mutex},
};

use super::libsox::register_libsox;
use crate::sox::SoxLoader;

/// Per-script log output (log.info / log.warn / log.error calls).
#[derive(Debug, Clone)]
pub struct ScriptLogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: i64,
}

pub type ScriptLog = Arc<Mutex<Vec<ScriptLogEntry>>>;

/// Register all Lua API globals on `lua`.
///
/// `log_sink` — entries written by log.info/warn/error land here.
/// `loader`   — shared libsox handle; loaded on the first native call.
pub fn register_all(
    lua: &Lua,
    log_sink: ScriptLog,
    loader: Rc<SoxLoader>,
    default_buffer_size: usize,
) -> LuaResult<()> {
    register_log(lua, log_sink)?;
    register_libsox(lua, loader, default_buffer_size)?;
    Ok(())
}

// ── log ───────────────────────────────────────────────────────────────────────

fn register_log(lua: &Lua, sink: ScriptLog) -> LuaResult<()> {
    let log_tbl = lua.create_table()?;

    macro_rules! log_fn {
        ($level:literal, $mac:ident) => {{
            let sink = Arc::clone(&sink);
            lua.create_function(move |_, msg: String| {
                log::$mac!("[script] {}", msg);
                let entry = ScriptLogEntry {
                    level: $level.to_string(),
                    message: msg,
                    timestamp: chrono::Utc::now().timestamp(),
                };
                if let Ok(mut sink) = sink.lock() {
                    sink.push(entry);
                }
                Ok(())
            })?
        }};
    }

    log_tbl.set("info", log_fn!("info", info))?;
    log_tbl.set("warn", log_fn!("warn", warn))?;
    log_tbl.set("error", log_fn!("error", error))?;
    lua.globals().set("log", log_tbl)?;
    Ok(())
}
