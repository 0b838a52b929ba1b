//! Session configuration types and builders.

use std::net::SocketAddr;
use std::time::Duration;

use coherence_core::{CoherenceError, Result};

/// Default grid endpoint.
const DEFAULT_ADDRESS: &str = "127.0.0.1:1408";
/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on connection establishment.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How the session channel is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Unencrypted TCP.
    #[default]
    Plaintext,
    /// Server-authenticated TLS.
    Tls,
    /// Mutual TLS with a client certificate.
    TlsMutual,
}

/// Configuration for a [`Session`](crate::Session).
///
/// Built via [`SessionConfig::builder`]:
///
/// ```
/// use std::time::Duration;
/// use coherence_client::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .address("10.0.0.1:1408".parse().unwrap())
///     .scope("orders")
///     .request_timeout(Duration::from_secs(5))
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    address: SocketAddr,
    tls_mode: TlsMode,
    scope: String,
    request_timeout: Duration,
    ready_timeout: Duration,
}

impl SessionConfig {
    /// Creates a new builder with default values.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// The grid endpoint address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The channel security mode.
    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    /// The namespace prefix applied to every cache name. Empty for the
    /// default scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The default deadline applied to each unary request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The bound on connection establishment.
    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.parse().expect("default address is valid"),
            tls_mode: TlsMode::default(),
            scope: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    address: Option<SocketAddr>,
    tls_mode: TlsMode,
    scope: Option<String>,
    request_timeout: Option<Duration>,
    ready_timeout: Option<Duration>,
}

impl SessionConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the grid endpoint address.
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the channel security mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Sets the namespace prefix applied to every cache name.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the default deadline applied to each unary request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the bound on connection establishment.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Validates the options and builds the configuration.
    pub fn build(self) -> Result<SessionConfig> {
        let defaults = SessionConfig::default();

        let request_timeout = self.request_timeout.unwrap_or(defaults.request_timeout);
        if request_timeout.is_zero() {
            return Err(CoherenceError::Configuration(
                "request timeout must be non-zero".to_string(),
            ));
        }

        let ready_timeout = self.ready_timeout.unwrap_or(defaults.ready_timeout);
        if ready_timeout.is_zero() {
            return Err(CoherenceError::Configuration(
                "ready timeout must be non-zero".to_string(),
            ));
        }

        let scope = self.scope.unwrap_or_default();
        if scope.contains(':') {
            return Err(CoherenceError::Configuration(
                "scope must not contain ':'".to_string(),
            ));
        }

        Ok(SessionConfig {
            address: self.address.unwrap_or(defaults.address),
            tls_mode: self.tls_mode,
            scope,
            request_timeout,
            ready_timeout,
        })
    }
}
