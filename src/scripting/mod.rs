/// `scripting/` — Lua host for the libsox bindings
///
/// Each script runs in its own sandboxed Lua VM (mlua).
/// The `libsox` module table is registered alongside a captured `log` table.
/// Script errors are caught and reported, never propagated as panics.
pub mod api;
pub mod engine;
pub mod libsox;
pub mod sandbox;
