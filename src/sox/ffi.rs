/// `sox/ffi.rs` — raw FFI declarations for libsox (`sox.h`, 14.4.x)
///
/// The library is opened at runtime via `libloading` so the crate builds and
/// the pure sample helpers work on machines without libsox installed.
/// Only the entry points the `libsox` script module forwards to are resolved.

use std::ffi::{c_char, c_int, c_void};
use std::path::Path;

use libloading::Library;

use super::error::SoxError;

// ---------------------------------------------------------------------------
// Scalar types and constants
// ---------------------------------------------------------------------------

/// Native sample: signed 32-bit, full scale is `[SOX_SAMPLE_MIN, SOX_SAMPLE_MAX]`.
pub type SoxSample = i32;

pub const SOX_SAMPLE_MAX: SoxSample = i32::MAX;
pub const SOX_SAMPLE_MIN: SoxSample = i32::MIN;

/// Return code of every `int`-returning libsox call on success.
pub const SOX_SUCCESS: c_int = 0;

/// `whence` for `sox_seek`: absolute offset from the start of the stream.
pub const SOX_SEEK_SET: c_int = 0;

/// `sox_bool` is a C enum: `sox_false = 0`, `sox_true = 1`.
pub type SoxBool = c_int;

// ---------------------------------------------------------------------------
// Descriptor records (fixed layout)
// ---------------------------------------------------------------------------

/// `sox_signalinfo_t`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SoxSignalInfo {
    pub rate: f64,
    pub channels: u32,
    pub precision: u32,
    pub length: u64,
    pub mult: *mut f64,
}

/// `sox_encodinginfo_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SoxEncodingInfo {
    pub encoding: c_int,
    pub bits_per_sample: u32,
    pub compression: f64,
    pub reverse_bytes: c_int,
    pub reverse_nibbles: c_int,
    pub reverse_bits: c_int,
    pub opposite_endian: SoxBool,
}

/// Leading fields of `sox_format_t`.
///
/// Only ever read through a pointer handed out by libsox; never allocated on
/// the Rust side, so the trailing (unlisted) fields are irrelevant.
#[repr(C)]
pub struct SoxFormat {
    pub filename: *mut c_char,
    pub signal: SoxSignalInfo,
    pub encoding: SoxEncodingInfo,
    pub filetype: *mut c_char,
}

/// Opaque `sox_effects_chain_t`.
#[repr(C)]
pub struct SoxEffectsChain {
    _private: [u8; 0],
}

/// Opaque `sox_effect_t`.
#[repr(C)]
pub struct SoxEffect {
    _private: [u8; 0],
}

/// Opaque `sox_effect_handler_t`.
#[repr(C)]
pub struct SoxEffectHandler {
    _private: [u8; 0],
}

// ---------------------------------------------------------------------------
// Function signatures
// ---------------------------------------------------------------------------

pub type SoxVersionFn = unsafe extern "C" fn() -> *const c_char;
pub type SoxStatusFn = unsafe extern "C" fn() -> c_int;
pub type SoxOpenReadFn = unsafe extern "C" fn(
    path: *const c_char,
    signal: *const SoxSignalInfo,
    encoding: *const SoxEncodingInfo,
    filetype: *const c_char,
) -> *mut SoxFormat;
pub type SoxOpenWriteFn = unsafe extern "C" fn(
    path: *const c_char,
    signal: *const SoxSignalInfo,
    encoding: *const SoxEncodingInfo,
    filetype: *const c_char,
    oob: *const c_void,
    overwrite_permitted: Option<unsafe extern "C" fn(filename: *const c_char) -> SoxBool>,
) -> *mut SoxFormat;
pub type SoxIoFn =
    unsafe extern "C" fn(ft: *mut SoxFormat, buf: *mut SoxSample, len: usize) -> usize;
pub type SoxSeekFn = unsafe extern "C" fn(ft: *mut SoxFormat, offset: u64, whence: c_int) -> c_int;
pub type SoxCloseFn = unsafe extern "C" fn(ft: *mut SoxFormat) -> c_int;
pub type SoxCreateEffectsChainFn = unsafe extern "C" fn(
    in_enc: *const SoxEncodingInfo,
    out_enc: *const SoxEncodingInfo,
) -> *mut SoxEffectsChain;
pub type SoxDeleteEffectsChainFn = unsafe extern "C" fn(ecp: *mut SoxEffectsChain);
pub type SoxFindEffectFn = unsafe extern "C" fn(name: *const c_char) -> *const SoxEffectHandler;
pub type SoxCreateEffectFn = unsafe extern "C" fn(eh: *const SoxEffectHandler) -> *mut SoxEffect;
pub type SoxEffectOptionsFn =
    unsafe extern "C" fn(effp: *mut SoxEffect, argc: c_int, argv: *const *mut c_char) -> c_int;
pub type SoxAddEffectFn = unsafe extern "C" fn(
    chain: *mut SoxEffectsChain,
    effp: *mut SoxEffect,
    in_signal: *mut SoxSignalInfo,
    out_signal: *const SoxSignalInfo,
) -> c_int;
pub type SoxFlowEffectsCallback =
    unsafe extern "C" fn(all_done: SoxBool, client_data: *mut c_void) -> c_int;
pub type SoxFlowEffectsFn = unsafe extern "C" fn(
    chain: *mut SoxEffectsChain,
    callback: Option<SoxFlowEffectsCallback>,
    client_data: *mut c_void,
) -> c_int;
pub type SoxDeleteEffectFn = unsafe extern "C" fn(effp: *mut SoxEffect);

#[cfg(not(windows))]
extern "C" {
    /// C allocator `free`. `sox_add_effect` copies the effect record into the
    /// chain, leaving the caller to release only the shell with plain `free`.
    pub fn free(ptr: *mut c_void);
}

/// Resolved libsox function pointers.
#[derive(Clone, Copy)]
pub struct SoxFunctionList {
    pub version: SoxVersionFn,
    pub init: SoxStatusFn,
    pub quit: SoxStatusFn,
    pub open_read: SoxOpenReadFn,
    pub open_write: SoxOpenWriteFn,
    pub read: SoxIoFn,
    pub write: SoxIoFn,
    pub seek: SoxSeekFn,
    pub close: SoxCloseFn,
    pub create_effects_chain: SoxCreateEffectsChainFn,
    pub delete_effects_chain: SoxDeleteEffectsChainFn,
    pub find_effect: SoxFindEffectFn,
    pub create_effect: SoxCreateEffectFn,
    pub effect_options: SoxEffectOptionsFn,
    pub add_effect: SoxAddEffectFn,
    pub flow_effects: SoxFlowEffectsFn,
    /// Absent from some older 14.4 builds.
    pub delete_effect: Option<SoxDeleteEffectFn>,
}

/// An opened libsox shared object plus its resolved entry points.
pub struct SoxLibrary {
    /// Must outlive every function pointer in `api`.
    _lib: Library,
    pub api: SoxFunctionList,
}

impl SoxLibrary {
    /// Platform-specific candidate names, tried in order.
    pub fn library_names() -> &'static [&'static str] {
        if cfg!(target_os = "windows") {
            &["libsox.dll", "sox.dll", "libsox-3.dll"]
        } else if cfg!(target_os = "macos") {
            &["libsox.dylib", "libsox.3.dylib"]
        } else {
            &["libsox.so.3", "libsox.so"]
        }
    }

    /// Load libsox from the system search path.
    pub fn load() -> Result<Self, SoxError> {
        let mut last_err = String::new();
        for name in Self::library_names() {
            // SAFETY: libsox runs no initialisation code with preconditions on load.
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    log::info!("Loaded {name}");
                    return Self::load_functions(lib);
                }
                Err(e) => last_err = format!("{name}: {e}"),
            }
        }
        Err(SoxError::LibraryNotFound(last_err))
    }

    /// Load from a specific path (non-standard installs, bundled builds).
    pub fn load_from(path: &Path) -> Result<Self, SoxError> {
        log::info!("Loading libsox from {}", path.display());
        // SAFETY: the caller asserts `path` is a libsox build.
        let lib = unsafe { Library::new(path) }
            .map_err(|e| SoxError::LibraryNotFound(format!("{}: {e}", path.display())))?;
        Self::load_functions(lib)
    }

    fn load_functions(lib: Library) -> Result<Self, SoxError> {
        macro_rules! sym {
            ($ty:ty, $name:literal) => {
                *lib.get::<$ty>(concat!($name, "\0").as_bytes())
                    .map_err(|e| SoxError::SymbolNotFound(format!("{}: {e}", $name)))?
            };
        }

        // SAFETY: every signature below mirrors its declaration in sox.h.
        let api = unsafe {
            SoxFunctionList {
                version: sym!(SoxVersionFn, "sox_version"),
                init: sym!(SoxStatusFn, "sox_init"),
                quit: sym!(SoxStatusFn, "sox_quit"),
                open_read: sym!(SoxOpenReadFn, "sox_open_read"),
                open_write: sym!(SoxOpenWriteFn, "sox_open_write"),
                read: sym!(SoxIoFn, "sox_read"),
                write: sym!(SoxIoFn, "sox_write"),
                seek: sym!(SoxSeekFn, "sox_seek"),
                close: sym!(SoxCloseFn, "sox_close"),
                create_effects_chain: sym!(SoxCreateEffectsChainFn, "sox_create_effects_chain"),
                delete_effects_chain: sym!(SoxDeleteEffectsChainFn, "sox_delete_effects_chain"),
                find_effect: sym!(SoxFindEffectFn, "sox_find_effect"),
                create_effect: sym!(SoxCreateEffectFn, "sox_create_effect"),
                effect_options: sym!(SoxEffectOptionsFn, "sox_effect_options"),
                add_effect: sym!(SoxAddEffectFn, "sox_add_effect"),
                flow_effects: sym!(SoxFlowEffectsFn, "sox_flow_effects"),
                delete_effect: lib
                    .get::<SoxDeleteEffectFn>(b"sox_delete_effect\0")
                    .ok()
                    .map(|s| *s),
            }
        };

        if api.delete_effect.is_none() {
            log::debug!("sox_delete_effect not exported; unused effects will leak");
        }

        Ok(Self { _lib: lib, api })
    }

    /// Pair an arbitrary library handle with a hand-built function list.
    #[cfg(test)]
    pub(crate) fn from_parts(lib: Library, api: SoxFunctionList) -> Self {
        Self { _lib: lib, api }
    }
}
