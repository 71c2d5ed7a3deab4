//! OCI Image Specification types.
//!
//! This module defines the manifest and descriptor types written to and read
//! from registries, together with the media types that mark an image as a
//! policy bundle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An OCI media type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    /// OCI image manifest media type.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// Default OCI image configuration media type.
    pub const OCI_CONFIG: &'static str = "application/vnd.oci.image.config.v1+json";

    /// Configuration media type marking an image as a policy bundle.
    ///
    /// Pull tooling matches on this exact string; it must not change.
    pub const POLICY_CONFIG: &'static str = "application/vnd.cncf.kyverno.config.v1+json";

    /// Media type of a layer holding one policy document.
    pub const POLICY_LAYER: &'static str = "application/vnd.cncf.kyverno.policy.layer.v1+yaml";

    /// Creates a new media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the media type string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Creates the OCI manifest media type.
    #[must_use]
    pub fn oci_manifest() -> Self {
        Self::new(Self::OCI_MANIFEST)
    }

    /// Creates the policy bundle configuration media type.
    #[must_use]
    pub fn policy_config() -> Self {
        Self::new(Self::POLICY_CONFIG)
    }

    /// Creates the policy layer media type.
    #[must_use]
    pub fn policy_layer() -> Self {
        Self::new(Self::POLICY_LAYER)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Computes the `sha256:<hex>` digest of a blob.
#[must_use]
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// OCI content descriptor.
///
/// A descriptor describes the disposition of targeted content. It includes
/// the type of the content, a content identifier (digest), and the byte-size
/// of the raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: MediaType,

    /// Digest of the targeted content.
    pub digest: String,

    /// Size in bytes of the content.
    pub size: u64,

    /// Optional annotations (key-value metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Creates a new descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_registry::{Descriptor, MediaType};
    ///
    /// let desc = Descriptor::new(MediaType::policy_layer(), "sha256:abc123", 1024);
    /// assert_eq!(desc.digest, "sha256:abc123");
    /// assert_eq!(desc.annotation("io.kyverno.image.name"), None);
    /// ```
    #[must_use]
    pub fn new(media_type: MediaType, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type,
            digest: digest.into(),
            size,
            annotations: None,
        }
    }

    /// Describes a blob, computing its digest and size.
    #[must_use]
    pub fn for_blob(media_type: MediaType, data: &[u8]) -> Self {
        Self::new(media_type, sha256_digest(data), data.len() as u64)
    }

    /// Returns the annotation value for `key`, if present.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

/// OCI Image Manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Configuration descriptor.
    pub config: Descriptor,

    /// Layers that make up the image, in order.
    #[serde(default)]
    pub layers: Vec<Descriptor>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    /// Creates a new manifest.
    #[must_use]
    pub const fn new(media_type: MediaType, config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type),
            config,
            layers,
            annotations: None,
        }
    }

    /// Returns true if the configuration marks this as a policy bundle.
    #[must_use]
    pub fn is_policy_bundle(&self) -> bool {
        self.config.media_type.as_str() == MediaType::POLICY_CONFIG
    }
}

/// Error response from registry API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// List of errors.
    #[serde(default)]
    pub errors: Vec<RegistryApiError>,
}

impl ErrorResponse {
    /// Renders the errors as a single message.
    #[must_use]
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Individual error from registry API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryApiError {
    /// Error code.
    pub code: String,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,

    /// Additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}
