//! Image reference parsing.
//!
//! Parses destinations like `registry.example.com/policies:v1` into their
//! registry, repository, tag and digest components.

use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;

/// Registry used when the reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when the reference names neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LENGTH: usize = 128;

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Registry host, with optional port (e.g. `ghcr.io`, `localhost:5000`).
    pub registry: String,
    /// Repository path (e.g. `org/policies`).
    pub repository: String,
    /// Tag, if any.
    pub tag: Option<String>,
    /// Digest (`algorithm:hex`), if any.
    pub digest: Option<String>,
}

impl Reference {
    /// Parses a reference of the form `[registry/]repository[:tag][@digest]`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidReference`] if the string is not a
    /// well-formed reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_registry::Reference;
    ///
    /// let r = Reference::parse("registry.example.com/policies:v1")?;
    /// assert_eq!(r.registry, "registry.example.com");
    /// assert_eq!(r.repository, "policies");
    /// assert_eq!(r.tag.as_deref(), Some("v1"));
    ///
    /// let r = Reference::parse("policies")?;
    /// assert_eq!(r.to_string(), "docker.io/library/policies:latest");
    /// # Ok::<(), dike_registry::RegistryError>(())
    /// ```
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (name_tag, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|reason| invalid(&reason))?;
                (name, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        // A tag separator is a colon after the last slash; earlier colons
        // belong to a registry port.
        let last_slash = name_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = &tag {
            validate_tag(tag).map_err(|reason| invalid(&reason))?;
        }

        let (registry, repository) = split_registry(name);
        validate_repository(&repository).map_err(|reason| invalid(&reason))?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Returns the registry host used for API requests.
    ///
    /// Docker Hub serves its API from a different host than the one used in
    /// references.
    #[must_use]
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            "registry-1.docker.io"
        } else {
            &self.registry
        }
    }

    /// Returns the identifier used in manifest URLs: the digest when present,
    /// the tag otherwise.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Returns `registry/repository` without tag or digest.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_registry(name: &str) -> (String, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_string(), rest.to_string());
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{name}")
    };
    (DEFAULT_REGISTRY.to_string(), repository)
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.is_empty() {
        return Err("repository is empty".to_string());
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err("repository contains an empty path component".to_string());
        }
        let valid_chars = component.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')
        });
        let bytes = component.as_bytes();
        let alnum_ends = bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric();
        if !valid_chars || !alnum_ends {
            return Err(format!(
                "repository component '{component}' must be lowercase alphanumerics separated by '.', '_' or '-'"
            ));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    let mut bytes = tag.bytes();
    let first_ok = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');
    let rest_ok = bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if first_ok && rest_ok && tag.len() <= MAX_TAG_LENGTH {
        Ok(())
    } else {
        Err(format!("'{tag}' is not a valid tag"))
    }
}

fn validate_digest(digest: &str) -> Result<(), String> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(format!("digest '{digest}' must have the form algorithm:hex"));
    };
    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'+' | b'.' | b'_' | b'-'));
    let hex_ok = hex.len() >= 32 && hex.bytes().all(|b| b.is_ascii_hexdigit());
    if algorithm == "sha256" && hex.len() != 64 {
        return Err(format!("sha256 digest '{digest}' must have 64 hex characters"));
    }
    if algorithm_ok && hex_ok {
        Ok(())
    } else {
        Err(format!("'{digest}' is not a valid digest"))
    }
}
