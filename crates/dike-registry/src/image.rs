//! In-memory assembly of policy images.
//!
//! An image is built by appending one layer per policy to an empty skeleton.
//! [`ImageBuilder`] is consumed and returned by every step, so a partially
//! assembled image is never shared: either [`ImageBuilder::build`] yields the
//! whole image or the builder is dropped on the first failure.
//!
//! ```text
//! empty ──► media_type ──► config_media_type ──► append* ──► build ──► PolicyImage
//! ```

use std::collections::BTreeMap;

use dike_core::{codec, Policy};
use tracing::debug;

use crate::error::RegistryError;
use crate::oci::{sha256_digest, Descriptor, Manifest, MediaType};

/// Layer annotation carrying the policy name.
pub const ANNOTATION_NAME: &str = "io.kyverno.image.name";

/// Layer annotation carrying the policy kind (`ClusterPolicy` or `Policy`).
pub const ANNOTATION_KIND: &str = "io.kyverno.image.kind";

/// Layer annotation carrying the policy scope (`cluster` or `namespaced`).
pub const ANNOTATION_SCOPE: &str = "io.kyverno.image.scope";

/// Configuration blob written for policy images.
const EMPTY_CONFIG: &[u8] = b"{}";

/// One content blob of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    data: Vec<u8>,
    media_type: MediaType,
    digest: String,
    annotations: BTreeMap<String, String>,
}

impl Layer {
    /// Creates a layer from raw bytes, computing its digest.
    #[must_use]
    pub fn new(data: Vec<u8>, media_type: MediaType) -> Self {
        let digest = sha256_digest(&data);
        Self {
            data,
            media_type,
            digest,
            annotations: BTreeMap::new(),
        }
    }

    /// Returns the layer content.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the layer media type.
    #[must_use]
    pub const fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Returns the `sha256:<hex>` content digest.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns the content size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns the layer annotations.
    #[must_use]
    pub const fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Returns the annotation value for `key`, if present.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Returns the manifest descriptor for this layer.
    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        let mut descriptor = Descriptor::new(self.media_type.clone(), &self.digest, self.size());
        if !self.annotations.is_empty() {
            descriptor.annotations = Some(self.annotations.clone());
        }
        descriptor
    }

    /// Decodes the layer content back into a policy.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PolicyDecode`] if the content is not a policy
    /// document.
    pub fn policy(&self) -> Result<Policy, RegistryError> {
        codec::from_canonical_yaml(&self.data).map_err(|source| RegistryError::PolicyDecode {
            digest: self.digest.clone(),
            source,
        })
    }
}

/// A layer together with the annotations to attach when appending it.
#[derive(Debug, Clone)]
pub struct Addendum {
    /// The layer to append.
    pub layer: Layer,
    /// Annotations to attach to the layer descriptor.
    pub annotations: BTreeMap<String, String>,
}

impl Addendum {
    /// Packages one policy: canonical YAML content, policy layer media type
    /// and name/kind/scope annotations.
    ///
    /// # Errors
    ///
    /// Returns [`dike_core::Error::Serialization`] if the policy cannot be
    /// encoded.
    pub fn for_policy(policy: &Policy) -> dike_core::Result<Self> {
        let data = codec::to_canonical_yaml(policy)?;
        Ok(Self {
            layer: Layer::new(data, MediaType::policy_layer()),
            annotations: policy_annotations(policy),
        })
    }
}

/// Returns the layer annotations describing a policy.
#[must_use]
pub fn policy_annotations(policy: &Policy) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ANNOTATION_NAME.to_string(), policy.name().to_string()),
        (ANNOTATION_KIND.to_string(), policy.kind.to_string()),
        (ANNOTATION_SCOPE.to_string(), policy.scope().to_string()),
    ])
}

/// Single-owner builder for a [`PolicyImage`].
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    media_type: MediaType,
    config_media_type: MediaType,
    config: Vec<u8>,
    layers: Vec<Layer>,
}

impl ImageBuilder {
    /// Starts from an empty image: OCI manifest and config media types, an
    /// empty JSON configuration and no layers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            media_type: MediaType::oci_manifest(),
            config_media_type: MediaType::new(MediaType::OCI_CONFIG),
            config: EMPTY_CONFIG.to_vec(),
            layers: Vec::new(),
        }
    }

    /// Starts a policy image: [`ImageBuilder::empty`] with the policy bundle
    /// configuration media type.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_core::{Policy, PolicyKind};
    /// use dike_registry::{Addendum, ImageBuilder, MediaType};
    /// use serde_json::json;
    ///
    /// let policy = Policy::new(PolicyKind::ClusterPolicy, "require-labels", json!({ "rules": [] }));
    /// let image = ImageBuilder::policy_image()
    ///     .append(Addendum::for_policy(&policy)?)?
    ///     .build()?;
    ///
    /// assert_eq!(image.config_media_type().as_str(), MediaType::POLICY_CONFIG);
    /// assert_eq!(image.layers().len(), 1);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    #[must_use]
    pub fn policy_image() -> Self {
        Self::empty()
            .media_type(MediaType::oci_manifest())
            .config_media_type(MediaType::policy_config())
    }

    /// Sets the manifest media type.
    #[must_use]
    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Sets the configuration media type.
    #[must_use]
    pub fn config_media_type(mut self, media_type: MediaType) -> Self {
        self.config_media_type = media_type;
        self
    }

    /// Appends a layer after every previously appended one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidLayer`] for an empty layer, a layer
    /// without media type, or an annotation with an empty key. The builder is
    /// consumed either way.
    pub fn append(mut self, addendum: Addendum) -> Result<Self, RegistryError> {
        let Addendum {
            mut layer,
            annotations,
        } = addendum;

        if layer.data.is_empty() {
            return Err(RegistryError::InvalidLayer {
                message: "layer content is empty".to_string(),
            });
        }
        if layer.media_type.is_empty() {
            return Err(RegistryError::InvalidLayer {
                message: format!("layer {} has no media type", layer.digest),
            });
        }
        if annotations.keys().any(String::is_empty) {
            return Err(RegistryError::InvalidLayer {
                message: format!("layer {} has an annotation with an empty key", layer.digest),
            });
        }

        layer.annotations.extend(annotations);
        debug!(digest = %layer.digest, size = layer.size(), position = self.layers.len(), "Appended layer");
        self.layers.push(layer);
        Ok(self)
    }

    /// Returns the number of layers appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if no layer has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Finishes the image.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidImage`] if no layer was appended.
    pub fn build(self) -> Result<PolicyImage, RegistryError> {
        if self.layers.is_empty() {
            return Err(RegistryError::InvalidImage {
                message: "image has no layers".to_string(),
            });
        }
        Ok(PolicyImage {
            media_type: self.media_type,
            config_media_type: self.config_media_type,
            config: self.config,
            layers: self.layers,
        })
    }
}

/// A finished policy image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyImage {
    media_type: MediaType,
    config_media_type: MediaType,
    config: Vec<u8>,
    layers: Vec<Layer>,
}

impl PolicyImage {
    /// Rebuilds an image from a fetched manifest and its blobs.
    ///
    /// `layers` must hold the content of every manifest layer, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is not a policy bundle, or if any blob
    /// does not match its descriptor.
    pub fn from_parts(
        manifest: &Manifest,
        config: Vec<u8>,
        layers: Vec<Vec<u8>>,
    ) -> Result<Self, RegistryError> {
        if !manifest.is_policy_bundle() {
            return Err(RegistryError::InvalidImage {
                message: format!(
                    "config media type is {}, expected {}",
                    manifest.config.media_type,
                    MediaType::POLICY_CONFIG
                ),
            });
        }
        if manifest.layers.len() != layers.len() {
            return Err(RegistryError::InvalidImage {
                message: format!(
                    "manifest lists {} layers but {} were provided",
                    manifest.layers.len(),
                    layers.len()
                ),
            });
        }
        verify_blob(&manifest.config, &config)?;

        let mut rebuilt = Vec::with_capacity(layers.len());
        for (descriptor, data) in manifest.layers.iter().zip(layers) {
            verify_blob(descriptor, &data)?;
            let mut layer = Layer::new(data, descriptor.media_type.clone());
            layer.annotations = descriptor.annotations.clone().unwrap_or_default();
            rebuilt.push(layer);
        }

        Ok(Self {
            media_type: manifest
                .media_type
                .clone()
                .unwrap_or_else(MediaType::oci_manifest),
            config_media_type: manifest.config.media_type.clone(),
            config,
            layers: rebuilt,
        })
    }

    /// Returns the manifest media type.
    #[must_use]
    pub const fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Returns the configuration media type.
    #[must_use]
    pub const fn config_media_type(&self) -> &MediaType {
        &self.config_media_type
    }

    /// Returns the configuration blob.
    #[must_use]
    pub fn config(&self) -> &[u8] {
        &self.config
    }

    /// Returns the layers, in order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the configuration descriptor.
    #[must_use]
    pub fn config_descriptor(&self) -> Descriptor {
        Descriptor::for_blob(self.config_media_type.clone(), &self.config)
    }

    /// Returns the image manifest.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        Manifest::new(
            self.media_type.clone(),
            self.config_descriptor(),
            self.layers.iter().map(Layer::descriptor).collect(),
        )
    }

    /// Returns the serialized manifest, as uploaded to a registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::JsonError`] if serialization fails.
    pub fn manifest_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        serde_json::to_vec(&self.manifest()).map_err(Into::into)
    }

    /// Returns the digest of the serialized manifest.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::JsonError`] if serialization fails.
    pub fn digest(&self) -> Result<String, RegistryError> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }

    /// Decodes every policy layer, in order. Layers of other media types are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PolicyDecode`] for the first layer that does
    /// not hold a policy document.
    pub fn policies(&self) -> Result<Vec<Policy>, RegistryError> {
        self.layers
            .iter()
            .filter(|layer| layer.media_type.as_str() == MediaType::POLICY_LAYER)
            .map(Layer::policy)
            .collect()
    }
}

fn verify_blob(descriptor: &Descriptor, data: &[u8]) -> Result<(), RegistryError> {
    if data.len() as u64 != descriptor.size {
        return Err(RegistryError::InvalidImage {
            message: format!(
                "blob {} size mismatch: expected {}, got {}",
                descriptor.digest,
                descriptor.size,
                data.len()
            ),
        });
    }
    let actual = sha256_digest(data);
    if actual != descriptor.digest {
        return Err(RegistryError::ChecksumMismatch {
            expected: descriptor.digest.clone(),
            actual,
        });
    }
    Ok(())
}
