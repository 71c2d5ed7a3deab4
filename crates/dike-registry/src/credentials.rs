//! Credential resolution for registry access.
//!
//! The registry client never decides on credentials itself: callers inject a
//! [`CredentialResolver`] which maps a registry host to a [`RegistryAuth`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::config::RegistryAuth;
use crate::error::RegistryError;
use crate::reference::DEFAULT_REGISTRY;

/// Resolves credentials for a registry host.
pub trait CredentialResolver: Send + Sync {
    /// Returns the credentials to use for `registry` (host or host:port).
    ///
    /// # Errors
    ///
    /// Returns an error if a credential source exists but cannot be read.
    fn resolve(&self, registry: &str) -> Result<RegistryAuth, RegistryError>;
}

/// Returns the same credentials for every registry.
#[derive(Debug, Clone)]
pub struct StaticCredentials(RegistryAuth);

impl StaticCredentials {
    /// Creates a resolver returning `auth`.
    #[must_use]
    pub const fn new(auth: RegistryAuth) -> Self {
        Self(auth)
    }

    /// Creates a resolver returning anonymous access.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(RegistryAuth::Anonymous)
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, _registry: &str) -> Result<RegistryAuth, RegistryError> {
        Ok(self.0.clone())
    }
}

/// Reads credentials from a Docker `config.json` file.
///
/// Only inline `auths` entries are supported; credential helpers are not
/// invoked.
#[derive(Debug, Clone)]
pub struct DockerConfigKeychain {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "registrytoken")]
    registry_token: Option<String>,
    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
}

/// Username docker uses when an identity token stands in for a password.
const IDENTITY_TOKEN_USER: &str = "<token>";

impl DockerConfigKeychain {
    /// Uses the config file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses `$DOCKER_CONFIG/config.json`, falling back to
    /// `~/.docker/config.json`.
    #[must_use]
    pub fn from_default_location() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG").map_or_else(
            || {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".docker")
            },
            PathBuf::from,
        );
        Self::new(dir.join("config.json"))
    }

    /// Returns the config file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<DockerConfig>, RegistryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RegistryError::IoError {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| RegistryError::AuthenticationFailed {
                message: format!("invalid docker config {}: {e}", self.path.display()),
            })
    }
}

impl CredentialResolver for DockerConfigKeychain {
    fn resolve(&self, registry: &str) -> Result<RegistryAuth, RegistryError> {
        let Some(config) = self.load()? else {
            return Ok(RegistryAuth::Anonymous);
        };

        let wanted = normalize_registry(registry);
        let entry = config
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        let Some(entry) = entry else {
            debug!(registry, path = %self.path.display(), "No docker config entry");
            return Ok(RegistryAuth::Anonymous);
        };

        if let Some(token) = entry.registry_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(RegistryAuth::bearer(token));
        }
        if let Some(token) = entry.identity_token.as_deref().filter(|t| !t.is_empty()) {
            let username = entry.username.as_deref().unwrap_or(IDENTITY_TOKEN_USER);
            return Ok(RegistryAuth::basic(username, token));
        }
        if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            return decode_auth(encoded);
        }
        match (&entry.username, &entry.password) {
            (Some(username), Some(password)) => Ok(RegistryAuth::basic(username, password)),
            _ => Ok(RegistryAuth::Anonymous),
        }
    }
}

/// Tries each resolver in turn; the first non-anonymous answer wins.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Box<dyn CredentialResolver>>,
}

impl ChainResolver {
    /// Creates an empty chain, which resolves to anonymous access.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver to the chain.
    #[must_use]
    pub fn with(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

impl std::fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl CredentialResolver for ChainResolver {
    fn resolve(&self, registry: &str) -> Result<RegistryAuth, RegistryError> {
        for resolver in &self.resolvers {
            let auth = resolver.resolve(registry)?;
            if !auth.is_anonymous() {
                return Ok(auth);
            }
        }
        Ok(RegistryAuth::Anonymous)
    }
}

fn decode_auth(encoded: &str) -> Result<RegistryAuth, RegistryError> {
    let invalid = || RegistryError::AuthenticationFailed {
        message: "invalid base64 'auth' entry in docker config".to_string(),
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    let (username, password) = decoded.split_once(':').ok_or_else(invalid)?;
    Ok(RegistryAuth::basic(username, password))
}

/// Reduces a registry key to its host, folding Docker Hub aliases together.
fn normalize_registry(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = key.split('/').next().unwrap_or(key);
    match host {
        "index.docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY,
        other => other,
    }
}
