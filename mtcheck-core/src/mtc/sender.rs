//! Runtime FFI wrapper over libmtcmaster, the timecode generator. The
//! library is loaded with dlopen semantics so there is no build-time link
//! dependency; a missing library is a fatal setup error for the whole run.

use std::{
    ffi::{c_char, c_int, c_void, CString},
    path::Path,
};

use thiserror::Error;
use tracing::{debug, info};

use crate::timecode::Timecode;

type FnCreate = unsafe extern "C" fn() -> *mut c_void;
type FnOpenPort = unsafe extern "C" fn(*mut c_void, c_int, *const c_char);
type FnControl = unsafe extern "C" fn(*mut c_void);
type FnSetTime = unsafe extern "C" fn(*mut c_void, u64);

/// Fixed locations probed when the library is not on the loader path.
const FALLBACK_PATHS: &[&str] = &[
    "/usr/local/lib/libmtcmaster.so",
    "/usr/lib/libmtcmaster.so",
    "libmtcmaster.so.0",
];

/// Owns the MTCSender instance inside libmtcmaster. The generator keeps
/// emitting continuously once started; `release` runs on Drop.
pub struct MtcSender {
    _lib:        libloading::Library,
    handle:      *mut c_void,
    fn_play:     FnControl,
    fn_stop:     FnControl,
    fn_pause:    FnControl,
    fn_set_time: FnSetTime,
    fn_release:  FnControl,
    fps:         u32,
}

// SAFETY: the handle is an opaque instance pointer used from one thread at
// a time; the function pointers are plain C entry points.
unsafe impl Send for MtcSender {}

impl MtcSender {
    /// Loads libmtcmaster, creates a sender instance, and opens its MIDI
    /// port. `port` 0 lets the library create a virtual port named
    /// `port_name`.
    #[inline]
    pub fn open(fps: u32, port: i32, port_name: &str) -> Result<Self, MtcSenderError> {
        let (lib, location) = load_library()?;
        info!("Loaded libmtcmaster from {}", location);

        // SAFETY: symbol names and signatures match the installed
        // libmtcmaster ABI; the instance handle outlives every call below.
        unsafe {
            let fn_create: FnCreate = *lib
                .get::<FnCreate>(b"MTCSender_create\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_create", e))?;
            let fn_open_port: FnOpenPort = *lib
                .get::<FnOpenPort>(b"MTCSender_openPort\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_openPort", e))?;
            let fn_play: FnControl = *lib
                .get::<FnControl>(b"MTCSender_play\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_play", e))?;
            let fn_stop: FnControl = *lib
                .get::<FnControl>(b"MTCSender_stop\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_stop", e))?;
            let fn_pause: FnControl = *lib
                .get::<FnControl>(b"MTCSender_pause\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_pause", e))?;
            let fn_set_time: FnSetTime = *lib
                .get::<FnSetTime>(b"MTCSender_setTime\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_setTime", e))?;
            let fn_release: FnControl = *lib
                .get::<FnControl>(b"MTCSender_release\0")
                .map_err(|e| MtcSenderError::MissingSymbol("MTCSender_release", e))?;

            let handle = fn_create();
            if handle.is_null() {
                return Err(MtcSenderError::CreateFailed);
            }

            let c_port_name =
                CString::new(port_name).map_err(|_| MtcSenderError::InvalidPortName)?;
            fn_open_port(handle, port, c_port_name.as_ptr());
            debug!("Opened MTC sender port {} ({})", port, port_name);

            Ok(MtcSender {
                _lib: lib,
                handle,
                fn_play,
                fn_stop,
                fn_pause,
                fn_set_time,
                fn_release,
                fps,
            })
        }
    }

    /// Pushes a new time to the generator, in nanoseconds.
    #[inline]
    pub fn set_time(&self, timecode: Timecode) {
        // SAFETY: handle is valid until Drop.
        unsafe { (self.fn_set_time)(self.handle, timecode.to_nanos()) }
    }

    /// Begin continuous emission.
    #[inline]
    pub fn play(&self) {
        // SAFETY: handle is valid until Drop.
        unsafe { (self.fn_play)(self.handle) }
    }

    /// Halt emission.
    #[inline]
    pub fn stop(&self) {
        // SAFETY: handle is valid until Drop.
        unsafe { (self.fn_stop)(self.handle) }
    }

    #[inline]
    pub fn pause(&self) {
        // SAFETY: handle is valid until Drop.
        unsafe { (self.fn_pause)(self.handle) }
    }

    #[inline]
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl Drop for MtcSender {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: release disposes of the instance created in open().
        unsafe { (self.fn_release)(self.handle) }
    }
}

fn load_library() -> Result<(libloading::Library, String), MtcSenderError> {
    let mut attempts = Vec::new();

    let default_name = libloading::library_filename("mtcmaster");
    // SAFETY: libmtcmaster has no load-time side effects beyond symbol
    // registration.
    match unsafe { libloading::Library::new(&default_name) } {
        Ok(lib) => return Ok((lib, default_name.to_string_lossy().into_owned())),
        Err(e) => attempts.push(format!("{}: {}", default_name.to_string_lossy(), e)),
    }

    for path in FALLBACK_PATHS {
        if Path::new(path).is_absolute() && !Path::new(path).exists() {
            attempts.push(format!("{}: not present", path));
            continue;
        }
        // SAFETY: as above.
        match unsafe { libloading::Library::new(path) } {
            Ok(lib) => return Ok((lib, (*path).to_owned())),
            Err(e) => attempts.push(format!("{}: {}", path, e)),
        }
    }

    Err(MtcSenderError::LibraryNotFound(attempts.join("; ")))
}

#[derive(Debug, Error)]
pub enum MtcSenderError {
    #[error("libmtcmaster not found ({0}). Please install libmtcmaster.")]
    LibraryNotFound(String),
    #[error("libmtcmaster is missing symbol {0}: {1}")]
    MissingSymbol(&'static str, #[source] libloading::Error),
    #[error("MTCSender_create returned null")]
    CreateFailed,
    #[error("MTC port name contains a null byte")]
    InvalidPortName,
}
