/// `config.rs` — binding configuration
///
/// Loaded from a JSON file, then overridden by `SOX_LIBRARY_PATH` and finally
/// by CLI flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scripting::sandbox::TrustLevel;

/// Environment variable that overrides `library_path`.
pub const LIBRARY_PATH_ENV: &str = "SOX_LIBRARY_PATH";

/// `buffer()` size when the script passes none.
pub const DEFAULT_BUFFER_SIZE: usize = 32768;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Explicit libsox shared object. `None` searches the platform path.
    pub library_path: Option<PathBuf>,
    /// Sample slots allocated by `libsox.buffer()` with no argument.
    pub default_buffer_size: usize,
    /// Standard libraries available to scripts.
    pub trust: TrustLevel,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            trust: TrustLevel::Basic,
        }
    }
}

impl BindingConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Apply `SOX_LIBRARY_PATH` if set and non-empty.
    pub fn with_env(mut self) -> Self {
        if let Some(p) = std::env::var_os(LIBRARY_PATH_ENV).filter(|p| !p.is_empty()) {
            log::debug!("{LIBRARY_PATH_ENV} overrides library path");
            self.library_path = Some(PathBuf::from(p));
        }
        self
    }
}
