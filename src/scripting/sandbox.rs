/// `scripting/sandbox.rs` — Lua sandbox restrictions per script
///
/// Every script VM is created with a restricted set of standard libraries.
/// Dangerous libraries (os, io, debug, package) are omitted by default.
/// The libsox module itself opens files by path regardless of trust level.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};
use serde::{Deserialize, Serialize};

/// Controls which Lua standard libraries are available to a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Default: string, table, math, coroutine; no I/O or OS
    #[default]
    Basic,
    /// Standard + io
    FileRead,
    /// Adds os and package; only for trusted scripts
    Elevated,
}

impl TrustLevel {
    pub fn std_libs(self) -> StdLib {
        let base = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE;
        match self {
            TrustLevel::Basic => base,
            TrustLevel::FileRead => base | StdLib::IO,
            TrustLevel::Elevated => base | StdLib::IO | StdLib::OS | StdLib::PACKAGE,
        }
    }
}

/// Creates a new Lua VM with sandbox restrictions applied.
///
/// `Lua::new()` would open every safe library, so the VM is built from the
/// trust level's set directly. The base library is always present.
pub fn create_sandboxed_vm(trust: TrustLevel) -> LuaResult<Lua> {
    Lua::new_with(trust.std_libs(), LuaOptions::default())
}
