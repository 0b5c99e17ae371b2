//! The boundary to the native resolution engine.
//!
//! The engine that actually answers reverse lookups is consumed as a
//! capability behind the [`Engine`] trait. The production implementation
//! drives a dynamically loaded libunbound, but anything that can create
//! contexts and complete lookups can stand in for it, which is how the
//! test suite exercises the rest of the crate without native code.
//!
//! The contract at this boundary is deliberately small: an engine creates
//! contexts from configuration snapshots, a context accepts reverse lookup
//! requests together with a completion, and the completion is invoked
//! exactly once per accepted request, possibly on an engine thread that is
//! distinct from every caller thread.

use std::error;
use std::fmt;

use crate::conf::ContextConfig;

//------------ Completion ----------------------------------------------------

/// The outcome of a single lookup as reported by the engine.
///
/// `Ok(Some(_))` carries the PTR name, `Ok(None)` means the lookup
/// completed but found no record, and `Err(_)` is a resolution error.
pub type LookupOutcome = Result<Option<String>, EngineError>;

/// The completion handed to [`EngineContext::reverse_lookup`].
///
/// Invoked exactly once for every accepted request.
pub type Completion = Box<dyn FnOnce(LookupOutcome) + Send + 'static>;

//------------ Engine --------------------------------------------------------

/// A resolution engine.
pub trait Engine: Send + Sync + 'static {
    /// Creates a new resolution context from a configuration snapshot.
    ///
    /// Fails if the engine rejects the configuration, for instance because
    /// a referenced configuration file is malformed.
    fn create_context(
        &self,
        config: &ContextConfig,
    ) -> Result<Box<dyn EngineContext>, EngineError>;

    /// Returns the engine's version string.
    fn version(&self) -> String;
}

//------------ EngineContext -------------------------------------------------

/// A live resolution context inside the engine.
///
/// Dropping the context releases all engine resources associated with it.
/// The caller guarantees that no accepted request is still unanswered when
/// that happens.
pub trait EngineContext: Send + Sync {
    /// Starts a reverse lookup for the given raw address bytes.
    ///
    /// The address is guaranteed by the caller to be either 4 or 16 bytes
    /// long. The call must not block on a native answer. If it returns
    /// `Ok(())`, `done` will be invoked exactly once, possibly on another
    /// thread. If it returns an error, `done` has not been and will never
    /// be invoked.
    fn reverse_lookup(
        &self,
        addr: &[u8],
        done: Completion,
    ) -> Result<(), EngineError>;
}

//------------ EngineError ---------------------------------------------------

/// An error reported by the resolution engine.
#[derive(Clone, Debug)]
pub struct EngineError {
    /// The engine's reason, as text.
    reason: Box<str>,
}

impl EngineError {
    /// Creates a new error from the engine's reason.
    pub fn new(reason: impl Into<String>) -> Self {
        EngineError {
            reason: reason.into().into_boxed_str(),
        }
    }

    /// Returns the engine's reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl error::Error for EngineError {}
