//! Configuring resolution contexts.
//!
//! A [`ContextConfig`] describes how a resolution context should behave:
//! whether the engine picks up the host system's resolver configuration or
//! reads a dedicated engine configuration file, and how long an individual
//! lookup may take before it is given up on.
//!
//! Configs are assembled through [`ContextConfig::builder`] and validated
//! when [`build`][ContextConfigBuilder::build] is called. A built config is
//! immutable. Every context created from it derives its behaviour from the
//! snapshot taken at creation time, so later configs never affect earlier
//! contexts.

use std::error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

//------------ Configuration Constants ---------------------------------------

/// Default upper bound for a single lookup.
const DEF_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

//------------ ContextConfig -------------------------------------------------

/// An immutable configuration snapshot for a resolution context.
///
/// The default config uses the system resolver and the default request
/// timeout of five seconds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContextConfig {
    /// Use the host system's resolver configuration?
    use_system_resolver: bool,

    /// Path to an engine configuration file.
    ///
    /// Only present, and then required, when `use_system_resolver` is false.
    unbound_config: Option<PathBuf>,

    /// Upper bound for a single lookup.
    request_timeout: Duration,
}

impl ContextConfig {
    /// Returns a builder initialized with the default values.
    pub fn builder() -> ContextConfigBuilder {
        ContextConfigBuilder::default()
    }

    /// Returns whether the engine uses the system resolver configuration.
    pub fn use_system_resolver(&self) -> bool {
        self.use_system_resolver
    }

    /// Returns the path to the engine configuration file, if any.
    pub fn unbound_config(&self) -> Option<&Path> {
        self.unbound_config.as_deref()
    }

    /// Returns the per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            use_system_resolver: true,
            unbound_config: None,
            request_timeout: DEF_REQUEST_TIMEOUT,
        }
    }
}

//------------ ContextConfigBuilder ------------------------------------------

/// A builder for a [`ContextConfig`].
#[derive(Clone, Debug)]
pub struct ContextConfigBuilder {
    /// See [`ContextConfig::use_system_resolver`].
    use_system_resolver: bool,

    /// See [`ContextConfig::unbound_config`].
    unbound_config: Option<PathBuf>,

    /// See [`ContextConfig::request_timeout`].
    request_timeout: Duration,
}

impl ContextConfigBuilder {
    /// Sets whether the engine should use the system resolver configuration.
    ///
    /// When disabled, a configuration file has to be supplied via
    /// [`unbound_config`][Self::unbound_config].
    pub fn use_system_resolver(mut self, yes: bool) -> Self {
        self.use_system_resolver = yes;
        self
    }

    /// Sets the path to the engine configuration file.
    ///
    /// The file is not read here. Whether its content is acceptable is
    /// decided by the engine when a context is created from the config.
    pub fn unbound_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.unbound_config = Some(path.into());
        self
    }

    /// Sets the upper bound for a single lookup.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validates the builder state and produces the config.
    pub fn build(self) -> Result<ContextConfig, ConfigError> {
        if !self.use_system_resolver && self.unbound_config.is_none() {
            return Err(ConfigError::MissingEngineConfig);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        Ok(ContextConfig {
            use_system_resolver: self.use_system_resolver,
            unbound_config: self.unbound_config,
            request_timeout: self.request_timeout,
        })
    }
}

impl Default for ContextConfigBuilder {
    fn default() -> Self {
        ContextConfigBuilder {
            use_system_resolver: true,
            unbound_config: None,
            request_timeout: DEF_REQUEST_TIMEOUT,
        }
    }
}

//------------ ConfigError ---------------------------------------------------

/// A context configuration could not be built.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The system resolver was disabled but no config file was supplied.
    MissingEngineConfig,

    /// The request timeout was zero.
    ZeroRequestTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEngineConfig => f.write_str(
                "an engine configuration file is required when the system \
                 resolver is disabled",
            ),
            ConfigError::ZeroRequestTimeout => {
                f.write_str("the request timeout must be greater than zero")
            }
        }
    }
}

impl error::Error for ConfigError {}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_uses_system_resolver() {
        let config = ContextConfig::builder().build().unwrap();
        assert!(config.use_system_resolver());
        assert_eq!(config.unbound_config(), None);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config, ContextConfig::default());
    }

    #[test]
    fn custom_config_requires_a_file() {
        let res = ContextConfig::builder().use_system_resolver(false).build();
        assert_eq!(res, Err(ConfigError::MissingEngineConfig));

        let config = ContextConfig::builder()
            .use_system_resolver(false)
            .unbound_config("/etc/unbound/unbound.conf")
            .build()
            .unwrap();
        assert!(!config.use_system_resolver());
        assert_eq!(
            config.unbound_config(),
            Some(Path::new("/etc/unbound/unbound.conf"))
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let res = ContextConfig::builder()
            .request_timeout(Duration::ZERO)
            .build();
        assert_eq!(res, Err(ConfigError::ZeroRequestTimeout));
    }

    #[test]
    fn sub_second_timeout_is_accepted() {
        let config = ContextConfig::builder()
            .request_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
    }
}
