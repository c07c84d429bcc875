//! Engine loader and process-wide API singleton.
//!
//! This module is responsible for:
//! - Locating the libchdb dynamic library on the current machine.
//! - Dynamically loading it and resolving ABI symbols into an [`Api`] handle.
//! - Exposing a process-wide singleton [`Runtime`] via [`runtime()`].
//!
//! ## Environment variables
//!
//! - `CHDB_LIB_PATH` *(optional)*: development escape hatch. If set, the
//!   engine is loaded directly from this path and no other location is tried.
//!
//! ## Search order
//!
//! Without the override, candidates are tried in order: the bare platform
//! soname (delegating to the system loader's own search path), then
//! well-known install directories (`/usr/local/lib`, plus `/opt/homebrew/lib`
//! on macOS).
//!
//! ## Initialization semantics
//!
//! The runtime is initialized lazily on first use and stored in a global
//! [`OnceLock`]. If initialization fails, subsequent calls to [`runtime()`]
//! will return the same error (cloned).

use std::{env, path::PathBuf, sync::OnceLock};

use libloading::Library;
use tracing::debug;

use crate::{api::Api, Error, Result};

/// Process-wide singleton storage for the runtime.
///
/// Note that this stores `Result<Runtime>` rather than `Runtime`, which means
/// a failed initialization is also cached and will be returned on subsequent
/// calls to [`runtime()`].
static RUNTIME: OnceLock<Result<Runtime>> = OnceLock::new();

/// Platform soname of the engine library.
#[cfg(target_os = "windows")]
const SONAME: &str = "chdb.dll";
#[cfg(not(target_os = "windows"))]
const SONAME: &str = "libchdb.so";

/// Loaded engine library and resolved ABI.
///
/// A [`Runtime`] owns the loaded dynamic library to ensure it remains alive
/// for the lifetime of the process. The [`Api`] is resolved from that library
/// and remains valid as long as the library stays loaded.
pub struct Runtime {
    /// Keep the library alive for the lifetime of the process.
    _lib: Library,
    /// ABI entrypoints resolved from the loaded engine library.
    pub api: Api,
    /// Filesystem path (or bare soname) the engine was loaded from.
    pub path: PathBuf,
}

/// Get the process-wide engine runtime singleton.
///
/// The runtime is lazily initialized on first call. If initialization fails,
/// the error is cached and later returned by subsequent calls.
///
/// # Errors
///
/// Returns [`Error::Load`] if no candidate library can be loaded or the
/// required ABI symbols cannot be resolved into an [`Api`].
pub fn runtime() -> Result<&'static Runtime> {
    match RUNTIME.get_or_init(Runtime::init) {
        Ok(rt) => Ok(rt),
        Err(e) => Err(e.clone()),
    }
}

impl Runtime {
    /// Initialize a [`Runtime`] by locating an engine library and loading it.
    ///
    /// Selection order:
    /// 1. If `CHDB_LIB_PATH` is set, load directly from that path.
    /// 2. Otherwise, try each entry of [`candidate_paths`] until one loads.
    fn init() -> Result<Self> {
        // Optional escape hatch for development:
        // point directly at an engine library on disk.
        if let Ok(p) = env::var("CHDB_LIB_PATH") {
            return unsafe { Self::load_from_path(PathBuf::from(p)) };
        }

        let mut last_err = None;
        for candidate in candidate_paths() {
            match unsafe { Self::load_from_path(candidate) } {
                Ok(rt) => return Ok(rt),
                Err(e) => {
                    debug!("engine candidate rejected: {e}");
                    last_err = Some(e);
                }
            }
        }

        let detail = match last_err {
            Some(Error::Load(msg)) => msg,
            _ => "no engine library candidates for this target".to_string(),
        };
        Err(Error::Load(format!(
            "{detail}; install libchdb or set CHDB_LIB_PATH to the library file"
        )))
    }

    /// Load the engine dynamic library from `path` and resolve its ABI into an [`Api`].
    ///
    /// # Safety
    ///
    /// This function is `unsafe` because it loads and binds to a dynamic
    /// library at runtime. Callers must ensure:
    /// - `path` points to a valid dynamic library file.
    /// - The library is a libchdb build compatible with the current process
    ///   (platform/arch/ABI).
    /// - The library exports the symbols required by [`Api::load`].
    ///
    /// Violating these expectations may lead to undefined behavior when the
    /// resolved symbols are called.
    unsafe fn load_from_path(path: PathBuf) -> Result<Self> {
        let lib = Library::new(&path)
            .map_err(|e| Error::Load(format!("failed to load engine '{}': {e}", path.display())))?;

        let api = Api::load(&lib).map_err(|e| {
            Error::Load(format!(
                "failed to resolve engine ABI symbols from '{}': {e}",
                path.display()
            ))
        })?;

        debug!("loaded chdb engine from '{}'", path.display());
        Ok(Self {
            _lib: lib,
            api,
            path,
        })
    }
}

/// Engine library locations to try, in order, when `CHDB_LIB_PATH` is unset.
///
/// The bare soname comes first so the system loader's search path
/// (ldconfig cache, `LD_LIBRARY_PATH`, `DYLD_LIBRARY_PATH`) wins over the
/// hardcoded install directories.
fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(SONAME)];

    // chDB release archives ship `libchdb.so` on macOS as well, but a
    // locally built dylib is worth a try there too.
    #[cfg(target_os = "macos")]
    candidates.push(PathBuf::from("libchdb.dylib"));

    #[cfg(not(target_os = "windows"))]
    candidates.push(PathBuf::from("/usr/local/lib").join(SONAME));

    #[cfg(target_os = "macos")]
    candidates.push(PathBuf::from("/opt/homebrew/lib").join(SONAME));

    candidates
}
