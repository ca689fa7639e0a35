/// `sox/library.rs` — safe entry points onto a loaded libsox
///
/// `Sox` owns the shared object; every handle it hands out keeps an `Arc` to
/// it so the function table outlives the native objects.

use std::{
    cell::RefCell,
    ffi::{CStr, CString},
    path::PathBuf,
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use super::{
    error::SoxError,
    ffi::{SoxFunctionList, SoxLibrary, SoxSignalInfo, SOX_SUCCESS},
    handles::{EffectHandler, Format},
};

pub struct Sox {
    lib: SoxLibrary,
    /// Set by `quit`, cleared by `init`. Format plugins are unloaded while set.
    quit: AtomicBool,
}

impl Sox {
    /// Load from `path`, or from the platform search path when `None`.
    pub fn load(path: Option<&std::path::Path>) -> Result<Arc<Self>, SoxError> {
        let lib = match path {
            Some(p) => SoxLibrary::load_from(p)?,
            None => SoxLibrary::load()?,
        };
        Ok(Self::from_library(lib))
    }

    pub(crate) fn from_library(lib: SoxLibrary) -> Arc<Self> {
        Arc::new(Self {
            lib,
            quit: AtomicBool::new(false),
        })
    }

    pub(crate) fn api(&self) -> &SoxFunctionList {
        &self.lib.api
    }

    /// "major.minor.revision"
    pub fn version(&self) -> String {
        // SAFETY: sox_version returns a pointer to a static NUL-terminated string.
        unsafe {
            let v = (self.api().version)();
            if v.is_null() {
                return String::new();
            }
            CStr::from_ptr(v).to_string_lossy().into_owned()
        }
    }

    pub fn init(&self) -> bool {
        // SAFETY: no preconditions.
        let rc = unsafe { (self.api().init)() };
        log::debug!("sox_init -> {rc}");
        if rc == SOX_SUCCESS {
            self.quit.store(false, Ordering::Relaxed);
        }
        rc == SOX_SUCCESS
    }

    pub fn quit(&self) -> bool {
        // SAFETY: no preconditions; libsox tolerates quit without init.
        let rc = unsafe { (self.api().quit)() };
        log::debug!("sox_quit -> {rc}");
        self.quit.store(true, Ordering::Relaxed);
        rc == SOX_SUCCESS
    }

    /// Whether a handle dropped while still live may be released natively.
    /// After `quit` the release would run plugin code that is no longer
    /// mapped, so the object is leaked instead.
    pub(crate) fn can_release_on_drop(&self, what: &str) -> bool {
        if self.quit.load(Ordering::Relaxed) {
            log::warn!("{what} dropped after sox_quit; leaking");
            false
        } else {
            true
        }
    }

    /// Open a decoding session with format auto-detection.
    pub fn open_read(self: &Arc<Self>, path: &str) -> Result<Option<Format>, SoxError> {
        let c_path = to_cstring("open_read", path)?;
        // SAFETY: c_path is NUL-terminated; NULL signal/encoding/filetype request detection.
        let ft = unsafe {
            (self.api().open_read)(c_path.as_ptr(), ptr::null(), ptr::null(), ptr::null())
        };
        log::debug!("sox_open_read({path}) -> {ft:p}");
        Ok(NonNull::new(ft).map(|p| Format::new(Arc::clone(self), p)))
    }

    /// Open an encoding session. `filetype` of `None` detects from the extension.
    pub fn open_write(
        self: &Arc<Self>,
        path: &str,
        signal: &SoxSignalInfo,
        filetype: Option<&str>,
    ) -> Result<Option<Format>, SoxError> {
        let c_path = to_cstring("open_write", path)?;
        let c_type = filetype.map(|t| to_cstring("open_write", t)).transpose()?;
        let type_ptr = c_type.as_ref().map_or(ptr::null(), |t| t.as_ptr());
        // SAFETY: all pointers are valid for the duration of the call; libsox
        // copies the signal record.
        let ft = unsafe {
            (self.api().open_write)(
                c_path.as_ptr(),
                signal,
                ptr::null(),
                type_ptr,
                ptr::null(),
                None,
            )
        };
        log::debug!("sox_open_write({path}, {filetype:?}) -> {ft:p}");
        Ok(NonNull::new(ft).map(|p| Format::new(Arc::clone(self), p)))
    }

    /// Look up an effect handler by exact name.
    pub fn find_effect(self: &Arc<Self>, name: &str) -> Result<Option<EffectHandler>, SoxError> {
        let c_name = to_cstring("find_effect", name)?;
        // SAFETY: c_name is NUL-terminated; the returned handler is static.
        let eh = unsafe { (self.api().find_effect)(c_name.as_ptr()) };
        Ok(NonNull::new(eh.cast_mut()).map(|p| EffectHandler::new(Arc::clone(self), name, p)))
    }
}

pub(crate) fn to_cstring(func: &'static str, s: &str) -> Result<CString, SoxError> {
    CString::new(s).map_err(|_| SoxError::invalid_argument(func, "string contains NUL"))
}

/// Loads libsox on first use.
///
/// Functions that never touch the native library (buffers, conversion,
/// metering) work without it.
pub struct SoxLoader {
    path: Option<PathBuf>,
    loaded: RefCell<Option<Arc<Sox>>>,
}

impl SoxLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            loaded: RefCell::new(None),
        }
    }

    /// Return the library, loading it if needed. A failed load is retried on
    /// the next call.
    pub fn get(&self) -> Result<Arc<Sox>, SoxError> {
        if let Some(sox) = self.loaded.borrow().as_ref() {
            return Ok(Arc::clone(sox));
        }
        let sox = Sox::load(self.path.as_deref())?;
        *self.loaded.borrow_mut() = Some(Arc::clone(&sox));
        Ok(sox)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.borrow().is_some()
    }
}
