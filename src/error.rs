//! Error type for context and lookup operations.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::error;
use std::fmt;
use std::sync::Arc;

use crate::conf::ConfigError;
use crate::engine::EngineError;
use crate::loader::LoadError;

//------------ Error ---------------------------------------------------------

/// Error type for context and lookup operations.
///
/// Configuration and address validation errors are reported synchronously.
/// Everything the engine decides is only ever delivered through the lookup
/// future. None of these errors are fatal to the process; only
/// [`NativeLibraryUnavailable`][Self::NativeLibraryUnavailable] makes the
/// crate as a whole unusable, and it is detected once, at first use.
#[derive(Clone, Debug)]
pub enum Error {
    /// A context configuration could not be built.
    InvalidConfig(ConfigError),

    /// The native resolution engine could not be located and loaded.
    NativeLibraryUnavailable(Arc<LoadError>),

    /// The engine rejected the configuration snapshot.
    ContextCreationFailed(EngineError),

    /// The target address was neither 4 nor 16 bytes long.
    InvalidAddress(usize),

    /// The handle does not refer to a live context.
    InvalidContext,

    /// The configured request timeout elapsed without a native answer.
    LookupTimedOut,

    /// The engine reported a resolution error.
    LookupFailed(EngineError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(err) => {
                write!(f, "invalid configuration: {}", err)
            }
            Error::NativeLibraryUnavailable(err) => err.fmt(f),
            Error::ContextCreationFailed(err) => {
                write!(f, "could not create resolution context: {}", err)
            }
            Error::InvalidAddress(len) => {
                write!(f, "invalid address length {}, expected 4 or 16", len)
            }
            Error::InvalidContext => {
                f.write_str("context handle does not refer to a live context")
            }
            Error::LookupTimedOut => f.write_str("lookup timed out"),
            Error::LookupFailed(err) => {
                write!(f, "lookup failed: {}", err)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidConfig(err) => Some(err),
            Error::NativeLibraryUnavailable(err) => Some(err.as_ref()),
            Error::ContextCreationFailed(err) => Some(err),
            Error::InvalidAddress(_) => None,
            Error::InvalidContext => None,
            Error::LookupTimedOut => None,
            Error::LookupFailed(err) => Some(err),
        }
    }
}

//--- From

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::InvalidConfig(err)
    }
}
