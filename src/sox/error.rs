/// `sox/error.rs` — error types for the libsox bindings

use thiserror::Error;

/// Failures detected on the Rust side of the binding.
///
/// Native failure codes are not errors here: they surface as `false` / `None`
/// so scripts can decide what to do with them.
#[derive(Error, Debug)]
pub enum SoxError {
    /// The libsox shared object could not be opened.
    #[error("libsox not available: {0}")]
    LibraryNotFound(String),

    /// The shared object lacks a required entry point.
    #[error("libsox symbol missing: {0}")]
    SymbolNotFound(String),

    /// A handle argument carried the wrong tag.
    #[error("type_error: {0}")]
    TypeError(String),

    /// Argument is well-typed but unusable (negative size, interior NUL, ...).
    #[error("invalid argument for {func}: {reason}")]
    InvalidArgument { func: &'static str, reason: String },

    /// Buffer freed, session closed, chain deleted or effect already consumed.
    #[error("{kind} already released")]
    Released { kind: &'static str },

    /// Index or length past the end of a sample buffer.
    #[error("{func}: {requested} out of bounds for buffer of {len} samples")]
    OutOfBounds {
        func: &'static str,
        requested: usize,
        len: usize,
    },
}

impl SoxError {
    pub fn invalid_argument(func: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            func,
            reason: reason.into(),
        }
    }
}

impl From<SoxError> for mlua::Error {
    fn from(err: SoxError) -> Self {
        mlua::Error::external(err)
    }
}
