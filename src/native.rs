//! The libunbound-backed resolution engine.
//!
//! This module contains the production implementation of the
//! [`Engine`][crate::engine::Engine] capability. It talks to a libunbound
//! that was mapped into the process by the [loader][crate::loader], so
//! there is no link-time dependency on the library.
//!
//! Every context owns one `ub_ctx` plus a worker thread that polls the
//! context's readiness descriptor and runs `ub_process` to deliver
//! completions. The worker also performs the final `ub_ctx_delete` after
//! the stop flag is raised. That keeps teardown off the thread completions
//! run on: a completion that happens to drop the last reference to a
//! context would otherwise have to join the very thread it is running on.

use std::ffi::{CStr, CString};
use std::fmt::Write as _;
use std::os::raw::{c_char, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, trace, warn};

use crate::conf::ContextConfig;
use crate::engine::{Completion, Engine, EngineContext, EngineError};
use crate::error::Error;
use crate::loader;

//------------ Module Configuration ------------------------------------------

/// Record type PTR.
const RR_TYPE_PTR: c_int = 12;

/// Record class IN.
const RR_CLASS_IN: c_int = 1;

/// How long the worker sleeps in `poll` before rechecking the stop flag,
/// in milliseconds.
const WORKER_TICK_MS: c_int = 250;

/// Serializes `ub_ctx_config` calls, which are not thread safe in
/// libunbound.
static CONFIG_LOCK: Mutex<()> = Mutex::new(());

//------------ Raw ABI -------------------------------------------------------

/// An opaque engine context.
#[repr(C)]
pub(crate) struct UbCtx {
    _priv: [u8; 0],
}

/// A lookup result as handed to the completion callback.
///
/// Layout of libunbound's `struct ub_result`. Only a handful of fields are
/// read; the rest are present to keep the offsets right.
#[repr(C)]
#[allow(dead_code)]
pub(crate) struct UbResult {
    qname: *mut c_char,
    qtype: c_int,
    qclass: c_int,
    data: *mut *mut c_char,
    len: *mut c_int,
    canonname: *mut c_char,
    rcode: c_int,
    answer_packet: *mut c_void,
    answer_len: c_int,
    havedata: c_int,
    nxdomain: c_int,
    secure: c_int,
    bogus: c_int,
    why_bogus: *mut c_char,
    was_ratelimited: c_int,
    ttl: c_int,
}

/// The completion callback type of `ub_resolve_async`.
pub(crate) type UbCallback =
    unsafe extern "C" fn(*mut c_void, c_int, *mut UbResult);

//------------ NativeApi -----------------------------------------------------

/// The resolved engine entry points.
pub(crate) struct NativeApi {
    /// Where the library was loaded from.
    path: PathBuf,

    ub_ctx_create: unsafe extern "C" fn() -> *mut UbCtx,
    ub_ctx_delete: unsafe extern "C" fn(*mut UbCtx),
    ub_ctx_resolvconf:
        unsafe extern "C" fn(*mut UbCtx, *const c_char) -> c_int,
    ub_ctx_hosts: unsafe extern "C" fn(*mut UbCtx, *const c_char) -> c_int,
    ub_ctx_config: unsafe extern "C" fn(*mut UbCtx, *const c_char) -> c_int,
    ub_ctx_async: unsafe extern "C" fn(*mut UbCtx, c_int) -> c_int,
    ub_fd: unsafe extern "C" fn(*mut UbCtx) -> c_int,
    ub_process: unsafe extern "C" fn(*mut UbCtx) -> c_int,
    #[allow(clippy::type_complexity)]
    ub_resolve_async: unsafe extern "C" fn(
        *mut UbCtx,
        *const c_char,
        c_int,
        c_int,
        *mut c_void,
        UbCallback,
        *mut c_int,
    ) -> c_int,
    ub_resolve_free: unsafe extern "C" fn(*mut UbResult),
    ub_strerror: unsafe extern "C" fn(c_int) -> *const c_char,
    ub_version: unsafe extern "C" fn() -> *const c_char,
}

impl NativeApi {
    /// Resolves all entry points from a loaded library.
    ///
    /// Returns the name of the first missing symbol on failure. The caller
    /// retains ownership of `handle`.
    pub(crate) unsafe fn resolve(
        handle: *mut c_void,
        path: &Path,
    ) -> Result<Self, &'static str> {
        /// Resolves one symbol. The name must be NUL terminated.
        unsafe fn sym<T: Copy>(
            handle: *mut c_void,
            name: &'static [u8],
        ) -> Result<T, &'static str> {
            let ptr = libc::dlsym(handle, name.as_ptr() as *const c_char);
            if ptr.is_null() {
                Err(core::str::from_utf8(&name[..name.len() - 1])
                    .unwrap_or("<non-utf8 symbol>"))
            } else {
                Ok(core::mem::transmute_copy(&ptr))
            }
        }

        Ok(NativeApi {
            path: path.into(),
            ub_ctx_create: sym(handle, b"ub_ctx_create\0")?,
            ub_ctx_delete: sym(handle, b"ub_ctx_delete\0")?,
            ub_ctx_resolvconf: sym(handle, b"ub_ctx_resolvconf\0")?,
            ub_ctx_hosts: sym(handle, b"ub_ctx_hosts\0")?,
            ub_ctx_config: sym(handle, b"ub_ctx_config\0")?,
            ub_ctx_async: sym(handle, b"ub_ctx_async\0")?,
            ub_fd: sym(handle, b"ub_fd\0")?,
            ub_process: sym(handle, b"ub_process\0")?,
            ub_resolve_async: sym(handle, b"ub_resolve_async\0")?,
            ub_resolve_free: sym(handle, b"ub_resolve_free\0")?,
            ub_strerror: sym(handle, b"ub_strerror\0")?,
            ub_version: sym(handle, b"ub_version\0")?,
        })
    }

    /// Returns where the library was loaded from.
    #[allow(dead_code)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the engine's version string.
    pub(crate) fn version(&self) -> String {
        let ptr = unsafe { (self.ub_version)() };
        if ptr.is_null() {
            return String::from("unknown");
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    /// Returns the engine's text for an error code.
    fn strerror(&self, err: c_int) -> String {
        let ptr = unsafe { (self.ub_strerror)(err) };
        if ptr.is_null() {
            return format!("engine error {}", err);
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

//------------ NativeEngine --------------------------------------------------

/// The engine implementation backed by a dynamically loaded libunbound.
pub(crate) struct NativeEngine {
    /// The resolved entry points.
    api: Arc<NativeApi>,
}

impl NativeEngine {
    /// Creates the engine, loading the library if necessary.
    pub(crate) fn new() -> Result<Self, Error> {
        let api = loader::api().map_err(Error::NativeLibraryUnavailable)?;
        Ok(NativeEngine { api })
    }

    /// Applies the configuration snapshot to a fresh engine context.
    ///
    /// Returns the readiness descriptor on success.
    fn configure(
        &self,
        ctx: *mut UbCtx,
        config: &ContextConfig,
    ) -> Result<c_int, EngineError> {
        let api = &self.api;
        if config.use_system_resolver() {
            let resolv_conf = CStr::from_bytes_with_nul(b"/etc/resolv.conf\0")
                .expect("static path is NUL terminated");
            let err =
                unsafe { (api.ub_ctx_resolvconf)(ctx, resolv_conf.as_ptr()) };
            if err != 0 {
                return Err(EngineError::new(format!(
                    "error reading resolv.conf: {}",
                    api.strerror(err)
                )));
            }
            let hosts = CStr::from_bytes_with_nul(b"/etc/hosts\0")
                .expect("static path is NUL terminated");
            let err = unsafe { (api.ub_ctx_hosts)(ctx, hosts.as_ptr()) };
            if err != 0 {
                return Err(EngineError::new(format!(
                    "error reading hosts: {}",
                    api.strerror(err)
                )));
            }
        } else if let Some(path) = config.unbound_config() {
            let cpath = CString::new(path.as_os_str().as_bytes()).map_err(
                |_| EngineError::new("configuration path contains NUL"),
            )?;
            let _serialized =
                CONFIG_LOCK.lock().expect("engine config lock poisoned");
            let err = unsafe { (api.ub_ctx_config)(ctx, cpath.as_ptr()) };
            if err != 0 {
                return Err(EngineError::new(format!(
                    "error reading engine configuration from '{}': {}",
                    path.display(),
                    api.strerror(err)
                )));
            }
        }

        // Use a thread, not a forked process, for the engine's own work.
        if unsafe { (api.ub_ctx_async)(ctx, 1) } != 0 {
            return Err(EngineError::new(
                "could not configure asynchronous engine behaviour",
            ));
        }
        let fd = unsafe { (api.ub_fd)(ctx) };
        if fd < 0 {
            return Err(EngineError::new(
                "could not acquire readiness descriptor from engine context",
            ));
        }
        Ok(fd)
    }
}

impl Engine for NativeEngine {
    fn create_context(
        &self,
        config: &ContextConfig,
    ) -> Result<Box<dyn EngineContext>, EngineError> {
        let api = self.api.clone();
        let ctx = unsafe { (api.ub_ctx_create)() };
        if ctx.is_null() {
            return Err(EngineError::new("could not create engine context"));
        }
        let fd = match self.configure(ctx, config) {
            Ok(fd) => fd,
            Err(err) => {
                unsafe { (api.ub_ctx_delete)(ctx) };
                return Err(err);
            }
        };

        let shared = Arc::new(ContextShared {
            ctx: CtxPtr(ctx),
            stopping: AtomicBool::new(false),
        });
        let spawned = thread::Builder::new()
            .name(String::from("unbound-bridge-worker"))
            .spawn({
                let api = api.clone();
                let shared = shared.clone();
                move || worker(api, shared, fd)
            });
        if spawned.is_err() {
            unsafe { (api.ub_ctx_delete)(ctx) };
            return Err(EngineError::new(
                "could not spawn engine worker thread",
            ));
        }
        debug!("created native resolution context");
        Ok(Box::new(NativeContext { api, shared }))
    }

    fn version(&self) -> String {
        self.api.version()
    }
}

//------------ NativeContext -------------------------------------------------

/// A `ub_ctx` wrapped for sharing with the worker thread.
struct CtxPtr(*mut UbCtx);

impl CtxPtr {
    fn get(&self) -> *mut UbCtx {
        self.0
    }
}

// The engine context is documented to be usable from multiple threads.
unsafe impl Send for CtxPtr {}
unsafe impl Sync for CtxPtr {}

/// State shared between a context and its worker thread.
struct ContextShared {
    /// The engine context.
    ctx: CtxPtr,

    /// Raised when the context is being torn down.
    ///
    /// Once raised, the worker exits its loop and deletes the engine
    /// context. The registry guarantees no lookup is outstanding by then.
    stopping: AtomicBool,
}

/// A live context of the libunbound engine.
struct NativeContext {
    /// The resolved entry points.
    api: Arc<NativeApi>,

    /// State shared with the worker thread.
    shared: Arc<ContextShared>,
}

impl EngineContext for NativeContext {
    fn reverse_lookup(
        &self,
        addr: &[u8],
        done: Completion,
    ) -> Result<(), EngineError> {
        let name = reverse_name(addr);
        let cname = CString::new(name)
            .expect("reverse lookup names never contain NUL");
        let query = Box::new(QueryState {
            api: self.api.clone(),
            done,
        });
        let raw = Box::into_raw(query) as *mut c_void;
        let mut async_id: c_int = 0;
        let err = unsafe {
            (self.api.ub_resolve_async)(
                self.shared.ctx.get(),
                cname.as_ptr(),
                RR_TYPE_PTR,
                RR_CLASS_IN,
                raw,
                lookup_callback,
                &mut async_id,
            )
        };
        if err != 0 {
            // The request was not accepted, so no callback will fire.
            // Reclaim the query state.
            drop(unsafe { Box::from_raw(raw as *mut QueryState) });
            return Err(EngineError::new(self.api.strerror(err)));
        }
        trace!(async_id, "submitted reverse lookup to engine");
        Ok(())
    }
}

impl Drop for NativeContext {
    fn drop(&mut self) {
        // The worker picks this up within one tick and performs the
        // actual `ub_ctx_delete`.
        self.shared.stopping.store(true, Ordering::Release);
    }
}

/// Polls the context descriptor and delivers completions.
///
/// Owns the final `ub_ctx_delete`: once the stop flag is raised the loop
/// exits and the engine context is released here, never on a completion
/// path.
fn worker(api: Arc<NativeApi>, shared: Arc<ContextShared>, fd: c_int) {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    while !shared.stopping.load(Ordering::Acquire) {
        pollfd.revents = 0;
        let ready =
            unsafe { libc::poll(&mut pollfd, 1 as libc::nfds_t, WORKER_TICK_MS) };
        if ready > 0 && pollfd.revents & libc::POLLIN != 0 {
            let err = unsafe { (api.ub_process)(shared.ctx.get()) };
            if err != 0 {
                warn!("engine processing failed: {}", api.strerror(err));
            }
        } else if ready < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            // A broken descriptor must not turn into a busy loop. Keep
            // ticking until the context is torn down.
            warn!("engine descriptor poll failed: {}", errno);
            thread::sleep(std::time::Duration::from_millis(
                WORKER_TICK_MS as u64,
            ));
        }
    }
    unsafe { (api.ub_ctx_delete)(shared.ctx.get()) };
    debug!("released native resolution context");
}

//------------ QueryState ----------------------------------------------------

/// Per-request state handed through the engine as `user_data`.
struct QueryState {
    /// The resolved entry points, for result decoding and cleanup.
    api: Arc<NativeApi>,

    /// The completion to invoke exactly once.
    done: Completion,
}

/// The completion trampoline registered with `ub_resolve_async`.
unsafe extern "C" fn lookup_callback(
    arg: *mut c_void,
    err: c_int,
    result: *mut UbResult,
) {
    let query = Box::from_raw(arg as *mut QueryState);
    let outcome = if err != 0 {
        Err(EngineError::new(query.api.strerror(err)))
    } else if result.is_null() {
        Err(EngineError::new("engine delivered no result"))
    } else {
        decode_ptr_result(&*result)
    };
    if !result.is_null() {
        (query.api.ub_resolve_free)(result);
    }
    (query.done)(outcome);
}

/// Decodes the PTR answer out of an engine result.
fn decode_ptr_result(result: &UbResult) -> Result<Option<String>, EngineError> {
    match result.rcode {
        // NOERROR and NXDOMAIN are successful completions; anything else
        // is a resolution error.
        0 | 3 => {}
        rcode => {
            return Err(EngineError::new(format!(
                "resolution failed with {}",
                rcode_str(rcode)
            )))
        }
    }
    if result.havedata == 0 {
        return Ok(None);
    }
    let data = unsafe { *result.data };
    if data.is_null() {
        return Ok(None);
    }
    let len = unsafe { *result.len };
    if len <= 0 {
        return Err(EngineError::new("engine delivered empty record data"));
    }
    let wire = unsafe {
        std::slice::from_raw_parts(data as *const u8, len as usize)
    };
    wire_name_to_string(wire).map(Some).map_err(EngineError::new)
}

/// Returns a display name for a response code.
fn rcode_str(rcode: c_int) -> String {
    match rcode {
        1 => String::from("FORMERR"),
        2 => String::from("SERVFAIL"),
        4 => String::from("NOTIMP"),
        5 => String::from("REFUSED"),
        _ => format!("rcode {}", rcode),
    }
}

//------------ Name Conversion -----------------------------------------------

/// Translates raw address bytes into the reverse lookup name.
///
/// For example `192.0.2.5` becomes `5.2.0.192.in-addr.arpa.` and
/// `2001:db8::567:89ab` becomes the nibble-reversed `ip6.arpa.` name.
/// The address must be 4 or 16 bytes long.
pub(crate) fn reverse_name(addr: &[u8]) -> String {
    match addr.len() {
        4 => format!(
            "{}.{}.{}.{}.in-addr.arpa.",
            addr[3], addr[2], addr[1], addr[0]
        ),
        16 => {
            let mut res = String::with_capacity(72);
            for octet in addr.iter().rev() {
                write!(&mut res, "{:x}.{:x}.", octet & 0x0F, octet >> 4)
                    .expect("writing to a string cannot fail");
            }
            res.push_str("ip6.arpa.");
            res
        }
        _ => unreachable!("address length validated before dispatch"),
    }
}

/// Converts an uncompressed wire format domain name into presentation
/// format with a trailing dot.
///
/// Non-printable bytes are escaped as `\DDD`, dots and backslashes inside
/// labels as `\.` and `\\`.
fn wire_name_to_string(wire: &[u8]) -> Result<String, &'static str> {
    let mut res = String::new();
    let mut pos = 0;
    loop {
        let len = *wire.get(pos).ok_or("truncated domain name")? as usize;
        if len == 0 {
            if res.is_empty() {
                res.push('.');
            }
            return Ok(res);
        }
        if len > 63 {
            return Err("compressed or malformed domain name");
        }
        pos += 1;
        let label = wire
            .get(pos..pos + len)
            .ok_or("truncated domain name label")?;
        for &byte in label {
            match byte {
                b'.' | b'\\' => {
                    res.push('\\');
                    res.push(byte as char);
                }
                0x21..=0x7e => res.push(byte as char),
                _ => {
                    write!(&mut res, "\\{:03}", byte)
                        .expect("writing to a string cannot fail");
                }
            }
        }
        res.push('.');
        pos += len;
    }
}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv6Addr;
    use std::str::FromStr;

    #[test]
    fn reverse_name_v4() {
        assert_eq!(
            reverse_name(&[192, 0, 2, 5]),
            "5.2.0.192.in-addr.arpa."
        );
        assert_eq!(reverse_name(&[1, 1, 1, 1]), "1.1.1.1.in-addr.arpa.");
    }

    #[test]
    fn reverse_name_v6() {
        let addr = Ipv6Addr::from_str("2001:db8::567:89ab").unwrap();
        assert_eq!(
            reverse_name(&addr.octets()),
            "b.a.9.8.7.6.5.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.\
             ip6.arpa."
        );
    }

    #[test]
    fn wire_name_basic() {
        assert_eq!(
            wire_name_to_string(b"\x03one\x03one\x03one\x03one\x00").unwrap(),
            "one.one.one.one."
        );
    }

    #[test]
    fn wire_name_root() {
        assert_eq!(wire_name_to_string(b"\x00").unwrap(), ".");
    }

    #[test]
    fn wire_name_truncated() {
        assert!(wire_name_to_string(b"\x03on").is_err());
        assert!(wire_name_to_string(b"\x03one").is_err());
        assert!(wire_name_to_string(b"").is_err());
    }

    #[test]
    fn wire_name_escapes() {
        assert_eq!(
            wire_name_to_string(b"\x04a.b\x07\x00").unwrap(),
            "a\\.b\\007."
        );
    }
}
