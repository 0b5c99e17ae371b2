//! The asynchronous lookup bridge.
//!
//! This module turns one engine request into one [`Lookup`] future. The
//! request is dispatched into the engine before the future is returned, so
//! the calling thread never waits for a native answer; awaiting the future
//! is how a caller chooses to wait.
//!
//! The engine signals completion on a thread of its own choosing. A
//! oneshot channel carries that single write across threads to whichever
//! task is awaiting the future. The completion also owns the context
//! checkout, so the engine context stays alive until the engine has
//! answered, even when the caller gave up on the future long ago.

use core::future::ready;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::trace;

use crate::engine::{Completion, EngineError, LookupOutcome};
use crate::error::Error;
use crate::registry::{ContextEntry, Registry};

//------------ reverse_lookup ------------------------------------------------

/// Starts a reverse lookup for raw address bytes against a handle.
pub(crate) fn reverse_lookup(
    registry: &Registry,
    handle: u64,
    addr: &[u8],
) -> Lookup {
    if addr.len() != 4 && addr.len() != 16 {
        return Lookup::failed(Error::InvalidAddress(addr.len()));
    }
    let entry = match registry.checkout(handle) {
        Ok(entry) => entry,
        Err(err) => return Lookup::failed(err),
    };
    Lookup::start(entry, addr)
}

//------------ Lookup --------------------------------------------------------

/// The future of a single reverse lookup.
///
/// Resolves exactly once: to the PTR name, to `None` when the lookup
/// completed without finding a record, or to an error. A lookup that runs
/// into its configured timeout fails with
/// [`LookupTimedOut`][Error::LookupTimedOut]; the underlying engine work is
/// not cancelled and its eventual answer is discarded.
pub struct Lookup {
    /// The actual work.
    inner: BoxFuture<'static, Result<Option<String>, Error>>,
}

impl Lookup {
    /// Creates a lookup that has already failed.
    fn failed(err: Error) -> Self {
        Lookup {
            inner: Box::pin(ready(Err(err))),
        }
    }

    /// Dispatches the request and wires the completion to the future.
    fn start(entry: Arc<ContextEntry>, addr: &[u8]) -> Self {
        let handle = entry.handle();
        let request_timeout = entry.request_timeout();
        let (tx, rx) = oneshot::channel::<LookupOutcome>();

        // The completion owns the checkout. Whatever the engine decides,
        // the context cannot be torn down under an in-flight request.
        let checkout = entry.clone();
        let done: Completion = Box::new(move |outcome| {
            let _checkout = checkout;
            // The receiver is gone when the caller timed out or dropped
            // the future. The late answer is discarded.
            let _ = tx.send(outcome);
        });

        if let Err(err) = entry.engine_ctx().reverse_lookup(addr, done) {
            return Lookup::failed(Error::LookupFailed(err));
        }
        trace!(handle, "dispatched reverse lookup");

        Lookup {
            inner: Box::pin(async move {
                match timeout(request_timeout, rx).await {
                    Ok(Ok(Ok(result))) => Ok(result),
                    Ok(Ok(Err(err))) => Err(Error::LookupFailed(err)),
                    Ok(Err(_)) => Err(Error::LookupFailed(
                        EngineError::new("engine dropped the completion"),
                    )),
                    Err(_) => Err(Error::LookupTimedOut),
                }
            }),
        }
    }
}

impl Future for Lookup {
    type Output = Result<Option<String>, Error>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}
