/// `sox/handles.rs` — typed wrappers for every native object the bindings pass around
///
/// Each kind gets its own type so a session can never be handed to a call
/// expecting a chain. Wrappers are released explicitly (`close`, `delete`,
/// `free`); anything still live when dropped is cleaned up with a warning.

use std::{
    cell::Cell,
    ffi::{c_char, c_int, CStr},
    ptr::{self, NonNull},
    sync::Arc,
};

use super::{
    error::SoxError,
    ffi::{
        self, SoxEffect, SoxEffectHandler, SoxEffectsChain, SoxFormat, SoxSample,
        SoxSignalInfo, SOX_SEEK_SET, SOX_SUCCESS,
    },
    library::Sox,
};

// ── SampleBuffer ─────────────────────────────────────────────────────────────

/// Native-format sample storage owned by the caller.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Option<Vec<SoxSample>>,
}

impl SampleBuffer {
    /// Zero-filled buffer of `len` samples. `len == 0` is legal.
    pub fn new(len: usize) -> Self {
        log::debug!("buffer: {len} samples");
        Self {
            samples: Some(vec![0; len]),
        }
    }

    pub fn from_samples(samples: Vec<SoxSample>) -> Self {
        Self {
            samples: Some(samples),
        }
    }

    /// Release the storage. Later access fails with [`SoxError::Released`].
    pub fn free(&mut self) -> Result<(), SoxError> {
        self.samples
            .take()
            .map(|_| ())
            .ok_or(SoxError::Released { kind: "buffer" })
    }

    pub fn is_freed(&self) -> bool {
        self.samples.is_none()
    }

    pub fn samples(&self) -> Result<&[SoxSample], SoxError> {
        self.samples
            .as_deref()
            .ok_or(SoxError::Released { kind: "buffer" })
    }

    pub fn samples_mut(&mut self) -> Result<&mut [SoxSample], SoxError> {
        self.samples
            .as_deref_mut()
            .ok_or(SoxError::Released { kind: "buffer" })
    }

    pub fn get(&self, func: &'static str, index: usize) -> Result<SoxSample, SoxError> {
        let s = self.samples()?;
        s.get(index).copied().ok_or(SoxError::OutOfBounds {
            func,
            requested: index,
            len: s.len(),
        })
    }

    /// First `len` samples.
    pub fn prefix(&self, func: &'static str, len: usize) -> Result<&[SoxSample], SoxError> {
        let s = self.samples()?;
        s.get(..len).ok_or(SoxError::OutOfBounds {
            func,
            requested: len,
            len: s.len(),
        })
    }

    pub fn prefix_mut(
        &mut self,
        func: &'static str,
        len: usize,
    ) -> Result<&mut [SoxSample], SoxError> {
        let s = self.samples_mut()?;
        let total = s.len();
        s.get_mut(..len).ok_or(SoxError::OutOfBounds {
            func,
            requested: len,
            len: total,
        })
    }
}

// ── Format ───────────────────────────────────────────────────────────────────

/// `sox_signalinfo_t` projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInfo {
    pub channels: u32,
    pub length: u64,
    pub precision: u32,
    pub rate: f64,
}

/// `sox_encodinginfo_t` projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingInfo {
    pub bits_per_sample: u32,
    pub compression: f64,
    pub encoding: i32,
    pub opposite_endian: bool,
}

/// An open decode or encode session.
pub struct Format {
    sox: Arc<Sox>,
    ptr: Cell<Option<NonNull<SoxFormat>>>,
}

impl Format {
    pub(crate) fn new(sox: Arc<Sox>, ptr: NonNull<SoxFormat>) -> Self {
        Self {
            sox,
            ptr: Cell::new(Some(ptr)),
        }
    }

    pub(crate) fn as_ptr(&self) -> Result<*mut SoxFormat, SoxError> {
        self.ptr
            .get()
            .map(NonNull::as_ptr)
            .ok_or(SoxError::Released { kind: "format" })
    }

    /// Copy of the native signal record, as handed to `sox_open_write`.
    pub fn raw_signal(&self) -> Result<SoxSignalInfo, SoxError> {
        let ft = self.as_ptr()?;
        // SAFETY: ft is a live session returned by libsox.
        Ok(unsafe { (*ft).signal })
    }

    pub fn signal(&self) -> Result<SignalInfo, SoxError> {
        let s = self.raw_signal()?;
        Ok(SignalInfo {
            channels: s.channels,
            length: s.length,
            precision: s.precision,
            rate: s.rate,
        })
    }

    pub fn encoding(&self) -> Result<EncodingInfo, SoxError> {
        let ft = self.as_ptr()?;
        // SAFETY: ft is a live session returned by libsox.
        let e = unsafe { (*ft).encoding };
        Ok(EncodingInfo {
            bits_per_sample: e.bits_per_sample,
            compression: e.compression,
            encoding: e.encoding,
            opposite_endian: e.opposite_endian != 0,
        })
    }

    /// Decode up to `len` samples into `buf`. Returns 0 at end of stream.
    pub fn read(&self, buf: &mut SampleBuffer, len: usize) -> Result<usize, SoxError> {
        let ft = self.as_ptr()?;
        let dst = buf.prefix_mut("read", len)?;
        // SAFETY: dst holds exactly `len` writable samples.
        Ok(unsafe { (self.sox.api().read)(ft, dst.as_mut_ptr(), len) })
    }

    /// Encode the first `len` samples of `buf`.
    pub fn write(&self, buf: &SampleBuffer, len: usize) -> Result<usize, SoxError> {
        let ft = self.as_ptr()?;
        let src = buf.prefix("write", len)?;
        // SAFETY: libsox only reads `len` samples from the buffer.
        Ok(unsafe { (self.sox.api().write)(ft, src.as_ptr().cast_mut(), len) })
    }

    /// Seek to an absolute sample offset.
    pub fn seek(&self, offset: u64) -> Result<bool, SoxError> {
        let ft = self.as_ptr()?;
        // SAFETY: ft is a live session.
        Ok(unsafe { (self.sox.api().seek)(ft, offset, SOX_SEEK_SET) } == SOX_SUCCESS)
    }

    /// Close the session. The native result is returned; the handle is dead
    /// afterwards either way.
    pub fn close(&self) -> Result<bool, SoxError> {
        let ft = self
            .ptr
            .take()
            .ok_or(SoxError::Released { kind: "format" })?;
        // SAFETY: ft was live and is never used again.
        let rc = unsafe { (self.sox.api().close)(ft.as_ptr()) };
        log::debug!("sox_close({:p}) -> {rc}", ft.as_ptr());
        Ok(rc == SOX_SUCCESS)
    }
}

impl Drop for Format {
    fn drop(&mut self) {
        if let Some(ft) = self.ptr.take() {
            if !self.sox.can_release_on_drop("format session") {
                return;
            }
            log::warn!("format session {:p} dropped while open; closing", ft.as_ptr());
            // SAFETY: ft is live and owned by this handle.
            unsafe { (self.sox.api().close)(ft.as_ptr()) };
        }
    }
}

// ── EffectHandler ────────────────────────────────────────────────────────────

/// Static effect registration record. Never freed.
pub struct EffectHandler {
    sox: Arc<Sox>,
    name: String,
    ptr: NonNull<SoxEffectHandler>,
}

impl EffectHandler {
    pub(crate) fn new(sox: Arc<Sox>, name: &str, ptr: NonNull<SoxEffectHandler>) -> Self {
        Self {
            sox,
            name: name.to_string(),
            ptr,
        }
    }

    /// Instantiate an effect. `None` when libsox refuses.
    pub fn create_effect(&self) -> Option<Effect> {
        // SAFETY: the handler lives in libsox's static registry.
        let effp = unsafe { (self.sox.api().create_effect)(self.ptr.as_ptr()) };
        NonNull::new(effp).map(|p| Effect {
            sox: Arc::clone(&self.sox),
            name: self.name.clone(),
            ptr: Cell::new(Some(p)),
        })
    }
}

// ── Effect ───────────────────────────────────────────────────────────────────

/// One argument for `sox_effect_options`.
pub enum EffectArg<'a> {
    Str(&'a CStr),
    /// `input`/`output` effects take the session pointer in `argv[0]`.
    Format(&'a Format),
}

/// A configured processing stage, not yet added to a chain.
pub struct Effect {
    sox: Arc<Sox>,
    name: String,
    ptr: Cell<Option<NonNull<SoxEffect>>>,
}

impl Effect {
    pub(crate) fn as_ptr(&self) -> Result<*mut SoxEffect, SoxError> {
        self.ptr
            .get()
            .map(NonNull::as_ptr)
            .ok_or(SoxError::Released { kind: "effect" })
    }

    /// Forward `args` to the effect's option parser; returns its return code.
    pub fn options(&self, args: &[EffectArg<'_>]) -> Result<i32, SoxError> {
        let effp = self.as_ptr()?;
        let argv = args
            .iter()
            .map(|a| match a {
                EffectArg::Str(s) => Ok(s.as_ptr().cast_mut()),
                EffectArg::Format(f) => Ok(f.as_ptr()?.cast::<c_char>()),
            })
            .collect::<Result<Vec<*mut c_char>, SoxError>>()?;
        let argc = c_int::try_from(argv.len())
            .map_err(|_| SoxError::invalid_argument("effect_options", "too many arguments"))?;
        // SAFETY: argv entries outlive the call; libsox copies what it keeps.
        let rc = unsafe { (self.sox.api().effect_options)(effp, argc, argv.as_ptr()) };
        log::debug!("sox_effect_options({}, argc={argc}) -> {rc}", self.name);
        Ok(rc)
    }

    /// Mark as moved into a chain and free the shell libsox left behind.
    ///
    /// `sox_delete_effect` cannot be used for the shell: it would also free
    /// the private state the chain's copy now owns.
    fn consume(&self) {
        if let Some(effp) = self.ptr.take() {
            free_effect_shell(effp, &self.name);
        }
    }
}

#[cfg(not(windows))]
fn free_effect_shell(effp: NonNull<SoxEffect>, _name: &str) {
    // SAFETY: sox_add_effect copied the record; only the allocation remains
    // ours, and libsox shares the host's C heap on this platform.
    unsafe { ffi::free(effp.as_ptr().cast()) };
}

/// A runtime-loaded DLL may allocate from its own CRT heap, so the shell
/// cannot go to this process's `free`.
#[cfg(windows)]
fn free_effect_shell(effp: NonNull<SoxEffect>, name: &str) {
    log::debug!("effect '{name}' shell {:p} left to libsox's heap", effp.as_ptr());
}

impl Drop for Effect {
    fn drop(&mut self) {
        if let Some(effp) = self.ptr.take() {
            if !self.sox.can_release_on_drop("effect") {
                return;
            }
            match self.sox.api().delete_effect {
                // SAFETY: the effect was never added to a chain, so we still own it.
                Some(delete) => unsafe { delete(effp.as_ptr()) },
                None => log::warn!("effect '{}' dropped unused; leaking", self.name),
            }
        }
    }
}

// ── EffectsChain ─────────────────────────────────────────────────────────────

/// Ordered effect pipeline bound to an input and output encoding.
pub struct EffectsChain {
    sox: Arc<Sox>,
    ptr: Cell<Option<NonNull<SoxEffectsChain>>>,
}

impl EffectsChain {
    /// Build a chain from the encoding records of two sessions.
    pub fn create(input: &Format, output: &Format) -> Result<Option<Self>, SoxError> {
        let in_ft = input.as_ptr()?;
        let out_ft = output.as_ptr()?;
        let sox = &input.sox;
        // SAFETY: both sessions are live; the encoding records are read only.
        let chain = unsafe {
            (sox.api().create_effects_chain)(
                ptr::addr_of!((*in_ft).encoding),
                ptr::addr_of!((*out_ft).encoding),
            )
        };
        log::debug!("sox_create_effects_chain -> {chain:p}");
        Ok(NonNull::new(chain).map(|p| Self {
            sox: Arc::clone(sox),
            ptr: Cell::new(Some(p)),
        }))
    }

    fn as_ptr(&self) -> Result<*mut SoxEffectsChain, SoxError> {
        self.ptr
            .get()
            .map(NonNull::as_ptr)
            .ok_or(SoxError::Released {
                kind: "effects chain",
            })
    }

    /// Append `effect`. `input`'s signal record may be updated by libsox.
    /// On success the effect is consumed; on failure it stays with the caller.
    pub fn add_effect(
        &self,
        effect: &Effect,
        input: &Format,
        output: &Format,
    ) -> Result<bool, SoxError> {
        let chain = self.as_ptr()?;
        let effp = effect.as_ptr()?;
        let in_ft = input.as_ptr()?;
        let out_ft = output.as_ptr()?;
        // SAFETY: all four objects are live native allocations.
        let rc = unsafe {
            (self.sox.api().add_effect)(
                chain,
                effp,
                ptr::addr_of_mut!((*in_ft).signal),
                ptr::addr_of!((*out_ft).signal),
            )
        };
        log::debug!("sox_add_effect({}) -> {rc}", effect.name);
        if rc == SOX_SUCCESS {
            effect.consume();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Run the chain to completion. Blocks the calling thread.
    pub fn flow(&self) -> Result<bool, SoxError> {
        let chain = self.as_ptr()?;
        log::debug!("sox_flow_effects({chain:p}) starting");
        // SAFETY: chain is live; no progress callback.
        let rc = unsafe { (self.sox.api().flow_effects)(chain, None, ptr::null_mut()) };
        log::debug!("sox_flow_effects({chain:p}) -> {rc}");
        Ok(rc == SOX_SUCCESS)
    }

    pub fn delete(&self) -> Result<(), SoxError> {
        let chain = self.ptr.take().ok_or(SoxError::Released {
            kind: "effects chain",
        })?;
        // SAFETY: chain was live and is never used again.
        unsafe { (self.sox.api().delete_effects_chain)(chain.as_ptr()) };
        Ok(())
    }
}

impl Drop for EffectsChain {
    fn drop(&mut self) {
        if let Some(chain) = self.ptr.take() {
            if !self.sox.can_release_on_drop("effects chain") {
                return;
            }
            log::warn!("effects chain {:p} dropped without delete", chain.as_ptr());
            // SAFETY: chain is live and owned by this handle.
            unsafe { (self.sox.api().delete_effects_chain)(chain.as_ptr()) };
        }
    }
}
