pub mod config;
pub mod scripting;
pub mod sox;

pub use config::BindingConfig;
pub use scripting::engine::{ScriptEngine, ScriptRunResult};
pub use sox::{Sox, SoxError, SoxLoader};
