//! Locating and loading the native resolution engine.
//!
//! The engine library is loaded at most once per process. The first caller
//! performs the search described below; concurrent callers block until it
//! finishes and then observe the cached result, success or failure alike.
//!
//! The search tries, stopping at the first library that loads and carries
//! the full engine entry point table:
//!
//! 1. the explicit override path in the `UNBOUND_BRIDGE_LIB` environment
//!    variable,
//! 2. every directory in `UNBOUND_BRIDGE_LIB_PATH` (colon separated), each
//!    tried with the file name variants `{"", "lib"} x {".so", ".dylib",
//!    ".jnilib"}` around the base name `unbound`,
//! 3. a fixed list of conventional library directories with the same
//!    variants,
//! 4. the bare file name variants, which leaves resolution to the
//!    platform's default dynamic linker search.
//!
//! Both environment variables are read when the search runs. The library
//! is never unloaded; [`reload`] only drops the cached search result.

use std::env;
use std::error;
use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::error::Error;
use crate::native::NativeApi;

//------------ Module Configuration ------------------------------------------

/// Environment variable with an explicit path to the engine library.
const LIB_OVERRIDE_VAR: &str = "UNBOUND_BRIDGE_LIB";

/// Environment variable with extra directories to search.
const LIB_PATH_VAR: &str = "UNBOUND_BRIDGE_LIB_PATH";

/// Base name of the engine library.
const LIB_BASE_NAME: &str = "unbound";

/// Directories tried when the search path does not produce a hit.
const FALLBACK_DIRS: &[&str] =
    &["/usr/lib", "/usr/lib64", "/usr/local/lib", "/opt/local/lib"];

/// File name prefix variants.
const LIB_PREFIXES: &[&str] = &["", "lib"];

/// File name suffix variants.
const LIB_SUFFIXES: &[&str] = &[".so", ".dylib", ".jnilib"];

//------------ Process-wide State --------------------------------------------

/// The cached outcome of the one search this process performs.
///
/// `None` means nobody has searched yet. Holding the mutex across the
/// search is what makes concurrent initializers block until the first one
/// finishes.
static ENGINE: Mutex<Option<Result<Arc<NativeApi>, Arc<LoadError>>>> =
    Mutex::new(None);

/// Ensures the engine library is loaded, searching for it if necessary.
///
/// Idempotent. The failure case carries every location that was attempted.
pub fn ensure_loaded() -> Result<(), Error> {
    api().map(|_| ()).map_err(Error::NativeLibraryUnavailable)
}

/// Drops the cached search result so the next use searches again.
///
/// Contexts created before the reload keep using the library they were
/// created with; an already mapped library stays mapped.
pub fn reload() {
    let mut slot = ENGINE.lock().expect("engine loader state poisoned");
    *slot = None;
}

/// Returns the engine entry points, loading the library if necessary.
pub(crate) fn api() -> Result<Arc<NativeApi>, Arc<LoadError>> {
    let mut slot = ENGINE.lock().expect("engine loader state poisoned");
    if let Some(res) = slot.as_ref() {
        return res.clone();
    }
    let res = load().map(Arc::new).map_err(Arc::new);
    *slot = Some(res.clone());
    res
}

//------------ Search --------------------------------------------------------

/// Runs the search once, returning the first loadable candidate.
fn load() -> Result<NativeApi, LoadError> {
    let override_path = env::var_os(LIB_OVERRIDE_VAR).map(PathBuf::from);
    let search_dirs: Vec<PathBuf> = match env::var_os(LIB_PATH_VAR) {
        Some(paths) => env::split_paths(&paths).collect(),
        None => Vec::new(),
    };

    let mut attempted = Vec::new();
    for path in candidate_paths(override_path, &search_dirs) {
        trace!(path = %path.display(), "trying engine library candidate");
        match try_load(&path) {
            Ok(api) => {
                debug!(
                    path = %path.display(),
                    version = %api.version(),
                    "loaded native resolution engine"
                );
                return Ok(api);
            }
            Err(reason) => {
                attempted.push(format!("{}: {}", path.display(), reason));
            }
        }
    }
    Err(LoadError { attempted })
}

/// Returns every location to try, in search order.
fn candidate_paths(
    override_path: Option<PathBuf>,
    search_dirs: &[PathBuf],
) -> Vec<PathBuf> {
    let mut res = Vec::new();
    if let Some(path) = override_path {
        res.push(path);
    }
    let mut dirs: Vec<&Path> =
        search_dirs.iter().map(PathBuf::as_path).collect();
    dirs.extend(FALLBACK_DIRS.iter().map(Path::new));
    for dir in dirs {
        for name in file_name_variants() {
            res.push(dir.join(name));
        }
    }
    // Bare names go through the platform's own linker search.
    res.extend(file_name_variants().map(PathBuf::from));
    res
}

/// Returns the file name variants around the engine's base name.
fn file_name_variants() -> impl Iterator<Item = String> {
    LIB_PREFIXES.iter().flat_map(|prefix| {
        LIB_SUFFIXES
            .iter()
            .map(move |suffix| format!("{}{}{}", prefix, LIB_BASE_NAME, suffix))
    })
}

/// Tries to load one candidate and resolve the engine entry points.
fn try_load(path: &Path) -> Result<NativeApi, String> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| String::from("path contains a NUL byte"))?;
    let handle =
        unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
    if handle.is_null() {
        return Err(dlerror_string());
    }
    match unsafe { NativeApi::resolve(handle, path) } {
        Ok(api) => Ok(api),
        Err(symbol) => {
            unsafe { libc::dlclose(handle) };
            Err(format!("missing engine entry point {}", symbol))
        }
    }
}

/// Returns the pending `dlerror` message, if any.
fn dlerror_string() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        String::from("unknown dynamic linker error")
    } else {
        unsafe { std::ffi::CStr::from_ptr(msg) }
            .to_string_lossy()
            .into_owned()
    }
}

//------------ LoadError -----------------------------------------------------

/// The engine library could not be located and loaded.
///
/// Carries every attempted location together with the reason it was
/// rejected, which is usually all that is needed to diagnose a broken
/// installation.
#[derive(Debug)]
pub struct LoadError {
    /// The attempted locations, formatted as `path: reason`.
    attempted: Vec<String>,
}

impl LoadError {
    /// Returns the attempted locations, formatted as `path: reason`.
    pub fn attempted(&self) -> &[String] {
        &self.attempted
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("native resolution engine unavailable; attempted: ")?;
        let mut first = true;
        for attempt in &self.attempted {
            if !first {
                f.write_str("; ")?;
            }
            f.write_str(attempt)?;
            first = false;
        }
        Ok(())
    }
}

impl error::Error for LoadError {}

//============ Test ==========================================================
