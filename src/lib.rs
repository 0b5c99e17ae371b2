//! Asynchronous bindings to the libunbound resolution engine.
//!
//! This crate drives a natively loaded [libunbound] through opaque context
//! handles and future-style lookups. It covers one job and covers it
//! completely: reverse PTR lookups at high concurrency, without ever
//! blocking a calling thread and without reimplementing any resolution
//! logic. The engine library is discovered and loaded at runtime, so there
//! is no link-time dependency on it.
//!
//! # Modules
//!
//! * [conf] builds the immutable configuration snapshot a context is
//!   created from,
//! * [loader] locates and loads the engine library, once per process,
//! * [engine] defines the capability boundary to the engine, which is how
//!   tests substitute a scripted engine for the real one,
//! * [lookup] bridges engine completions into futures,
//! * [error] holds the error type shared by context and lookup operations.
//!
//! # Example
//!
//! ```no_run
//! use std::net::IpAddr;
//! use unbound_bridge::{ContextConfig, Unbound};
//!
//! # async fn demo() -> Result<(), unbound_bridge::Error> {
//! let unbound = Unbound::new()?;
//! let ctx = unbound.new_context(ContextConfig::default())?;
//! let addr: IpAddr = "1.1.1.1".parse().unwrap();
//! match unbound.reverse_lookup(&ctx, addr).await? {
//!     Some(name) => println!("{} points to {}", addr, name),
//!     None => println!("{} has no PTR record", addr),
//! }
//! unbound.dispose_context(&ctx);
//! # Ok(())
//! # }
//! ```
//!
//! [libunbound]: https://www.nlnetlabs.nl/documentation/unbound/libunbound/

use std::net::IpAddr;
use std::sync::Arc;

pub mod conf;
pub mod engine;
pub mod error;
pub mod loader;
pub mod lookup;

mod native;
mod registry;

pub use self::conf::ContextConfig;
pub use self::error::Error;
pub use self::lookup::Lookup;

use self::engine::Engine;
use self::native::NativeEngine;
use self::registry::Registry;

//------------ Unbound -------------------------------------------------------

/// The entry point to the resolution engine.
///
/// An `Unbound` owns the table of live resolution contexts and hands out
/// [`Context`] handles for them. Values can be cloned cheaply; clones share
/// the same engine and context table.
#[derive(Clone)]
pub struct Unbound {
    /// The shared state behind every clone.
    inner: Arc<Inner>,
}

/// The state shared by all clones of an [`Unbound`].
struct Inner {
    /// The resolution engine capability.
    engine: Arc<dyn Engine>,

    /// The table of live contexts.
    registry: Registry,
}

impl Unbound {
    /// Creates an entry point backed by the native engine.
    ///
    /// Ensures the engine library is loaded, searching for it if this is
    /// the first use in the process. This is the only operation that can
    /// fail with [`Error::NativeLibraryUnavailable`]; the error lists
    /// every location the search attempted.
    pub fn new() -> Result<Self, Error> {
        Ok(Self::with_engine(Arc::new(NativeEngine::new()?)))
    }

    /// Creates an entry point backed by the given engine.
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        Unbound {
            inner: Arc::new(Inner {
                engine,
                registry: Registry::new(),
            }),
        }
    }

    /// Creates a new resolution context from a configuration snapshot.
    pub fn new_context(
        &self,
        config: ContextConfig,
    ) -> Result<Context, Error> {
        self.inner
            .registry
            .create(&*self.inner.engine, config)
            .map(Context::new)
    }

    /// Starts a reverse lookup for an IP address.
    ///
    /// Returns immediately; the request has been handed to the engine when
    /// this returns. Await the returned [`Lookup`] for the outcome:
    /// `Ok(Some(_))` carries the PTR name, `Ok(None)` means the lookup
    /// completed but found no record.
    pub fn reverse_lookup(&self, ctx: &Context, addr: IpAddr) -> Lookup {
        match addr {
            IpAddr::V4(addr) => {
                self.reverse_lookup_bytes(ctx, &addr.octets())
            }
            IpAddr::V6(addr) => {
                self.reverse_lookup_bytes(ctx, &addr.octets())
            }
        }
    }

    /// Starts a reverse lookup for raw address bytes.
    ///
    /// The address must be 4 bytes for IPv4 or 16 bytes for IPv6; any
    /// other length fails with [`Error::InvalidAddress`] without an engine
    /// call being made.
    pub fn reverse_lookup_bytes(&self, ctx: &Context, addr: &[u8]) -> Lookup {
        lookup::reverse_lookup(&self.inner.registry, ctx.handle(), addr)
    }

    /// Disposes a resolution context.
    ///
    /// Lookups that are already in flight complete normally; the engine
    /// resources are released once the last of them has. Disposing a
    /// context twice is harmless, the second call is a no-op.
    pub fn dispose_context(&self, ctx: &Context) {
        self.inner.registry.destroy(ctx.handle());
    }

    /// Disposes every context this entry point still has live.
    pub fn close(&self) {
        self.inner.registry.destroy_all();
    }

    /// Returns the engine's version string.
    pub fn engine_version(&self) -> String {
        self.inner.engine.version()
    }
}

//------------ Context -------------------------------------------------------

/// A handle to a live resolution context.
///
/// Handles are plain values; copying one does not duplicate the underlying
/// context. A handle becomes dangling once the context is disposed, after
/// which lookups against it fail with [`Error::InvalidContext`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Context {
    /// The opaque handle value.
    handle: u64,
}

impl Context {
    /// Wraps a registry handle.
    fn new(handle: u64) -> Self {
        Context { handle }
    }

    /// Returns the opaque handle value.
    pub fn handle(&self) -> u64 {
        self.handle
    }
}
