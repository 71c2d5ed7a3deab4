//! Configuration types for the registry client.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// TLS configuration for custom CAs and mTLS.
    pub tls: Option<TlsConfig>,

    /// Registries reached over plain HTTP (host or host:port).
    pub insecure_registries: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfig {
    /// Creates a configuration with a 30 second timeout and no TLS overrides.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new();
    /// assert_eq!(config.timeout.as_secs(), 30);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("dike/{}", env!("CARGO_PKG_VERSION")),
            tls: None,
            insecure_registries: Vec::new(),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the TLS configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Marks a registry as reachable over plain HTTP.
    #[must_use]
    pub fn with_insecure_registry(mut self, registry: impl Into<String>) -> Self {
        self.insecure_registries.push(registry.into());
        self
    }

    /// Returns the URL scheme used for `registry`.
    ///
    /// Loopback registries and those listed as insecure use `http`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_registry::RegistryConfig;
    ///
    /// let config = RegistryConfig::new().with_insecure_registry("registry.lan:5000");
    /// assert_eq!(config.scheme("registry.lan:5000"), "http");
    /// assert_eq!(config.scheme("localhost:5000"), "http");
    /// assert_eq!(config.scheme("ghcr.io"), "https");
    /// ```
    #[must_use]
    pub fn scheme(&self, registry: &str) -> &'static str {
        let host = registry.split(':').next().unwrap_or(registry);
        let loopback = matches!(host, "localhost" | "127.0.0.1");
        if loopback || self.insecure_registries.iter().any(|r| r == registry) {
            "http"
        } else {
            "https"
        }
    }
}

/// Authentication methods for registry access.
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryAuth {
    /// No authentication.
    Anonymous,

    /// Basic authentication (username/password or username/token).
    Basic {
        /// Username.
        username: String,
        /// Password or token.
        password: String,
    },

    /// Bearer token authentication.
    Bearer {
        /// Token value.
        token: String,
    },
}

impl RegistryAuth {
    /// Creates basic authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_registry::RegistryAuth;
    ///
    /// let auth = RegistryAuth::basic("user", "pass");
    /// assert!(!auth.is_anonymous());
    /// ```
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Returns true for [`RegistryAuth::Anonymous`].
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// TLS configuration for registry connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Path to CA certificate file.
    pub ca_cert: Option<PathBuf>,

    /// Path to client certificate file.
    pub client_cert: Option<PathBuf>,

    /// Path to client private key file.
    pub client_key: Option<PathBuf>,

    /// Whether to skip certificate verification (NOT recommended for production).
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Creates a new TLS configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure_skip_verify: false,
        }
    }

    /// Sets the CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Sets client certificate and key paths for mTLS.
    #[must_use]
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Enables insecure mode (skips certificate verification).
    ///
    /// # Warning
    ///
    /// This should only be used for testing. Never use in production.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }
}
