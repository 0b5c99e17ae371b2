//! The table of live resolution contexts.
//!
//! The registry maps opaque integer handles to live engine contexts. It is
//! the only place that creates and destroys contexts; lookups merely check
//! a context out for the duration of one request.
//!
//! Teardown is reference counted. The registry's table holds one reference
//! to each entry and every in-flight lookup holds another, owned by its
//! completion. Destroying a handle removes the table reference, so the
//! engine context is actually released when the last outstanding lookup
//! completes, and immediately if there is none. New lookups against a
//! destroyed handle fail fast because the table no longer knows it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use crate::conf::ContextConfig;
use crate::engine::{Engine, EngineContext};
use crate::error::Error;

//------------ Registry ------------------------------------------------------

/// The table of live resolution contexts.
pub(crate) struct Registry {
    /// Live contexts by handle.
    contexts: Mutex<HashMap<u64, Arc<ContextEntry>>>,

    /// The handle generator.
    ///
    /// Handles are never reused within a process, so a stale handle can
    /// never alias a younger context.
    next_handle: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry {
            contexts: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Creates a new context from a configuration snapshot.
    pub fn create(
        &self,
        engine: &dyn Engine,
        config: ContextConfig,
    ) -> Result<u64, Error> {
        let engine_ctx = engine
            .create_context(&config)
            .map_err(Error::ContextCreationFailed)?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(ContextEntry {
            handle,
            engine_ctx,
            request_timeout: config.request_timeout(),
        });
        self.contexts
            .lock()
            .expect("context table poisoned")
            .insert(handle, entry);
        debug!(handle, "created resolution context");
        Ok(handle)
    }

    /// Checks a context out for one lookup.
    ///
    /// The returned reference keeps the engine context alive until the
    /// lookup's completion drops it.
    pub fn checkout(&self, handle: u64) -> Result<Arc<ContextEntry>, Error> {
        self.contexts
            .lock()
            .expect("context table poisoned")
            .get(&handle)
            .cloned()
            .ok_or(Error::InvalidContext)
    }

    /// Destroys a context.
    ///
    /// Lookups that are already in flight complete normally; the engine
    /// context is released once the last of them has. Destroying a handle
    /// that is not live is a no-op.
    pub fn destroy(&self, handle: u64) {
        let entry = self
            .contexts
            .lock()
            .expect("context table poisoned")
            .remove(&handle);
        match entry {
            Some(_entry) => debug!(handle, "destroyed resolution context"),
            None => {
                debug!(handle, "ignoring destroy of unknown context handle")
            }
        }
    }

    /// Destroys every live context.
    pub fn destroy_all(&self) {
        let drained: Vec<_> = {
            let mut contexts =
                self.contexts.lock().expect("context table poisoned");
            contexts.drain().collect()
        };
        for (handle, _entry) in drained {
            debug!(handle, "destroyed resolution context");
        }
    }
}

//------------ ContextEntry --------------------------------------------------

/// A live context and the request settings captured at its creation.
pub(crate) struct ContextEntry {
    /// The handle under which the context was registered.
    handle: u64,

    /// The engine context. Dropped when the entry is, which releases all
    /// engine resources.
    engine_ctx: Box<dyn EngineContext>,

    /// The per-request timeout from the configuration snapshot.
    request_timeout: Duration,
}

impl ContextEntry {
    /// Returns the context's handle.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Returns the engine context.
    pub fn engine_ctx(&self) -> &dyn EngineContext {
        &*self.engine_ctx
    }

    /// Returns the per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Drop for ContextEntry {
    fn drop(&mut self) {
        trace!(handle = self.handle, "releasing engine context");
    }
}

//============ Test ==========================================================
