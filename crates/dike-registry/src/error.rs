//! Error types for registry operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during image assembly and registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to registry.
    #[error("Failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// Manifest not found in registry.
    #[error("Image not found: {reference}")]
    NotFound {
        /// Image reference.
        reference: String,
    },

    /// The image is not a well-formed policy image.
    #[error("Invalid policy image: {message}")]
    InvalidImage {
        /// Error message.
        message: String,
    },

    /// A layer could not be appended to the image.
    #[error("Invalid layer: {message}")]
    InvalidLayer {
        /// Error message.
        message: String,
    },

    /// Checksum mismatch during download.
    #[error("Checksum mismatch for blob: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected digest.
        expected: String,
        /// Actual digest.
        actual: String,
    },

    /// File I/O error.
    #[error("File I/O error at {path}: {source}")]
    IoError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// HTTP error from registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid URL.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// Invalid reference format.
    #[error("Invalid reference format '{reference}': {reason}")]
    InvalidReference {
        /// Reference string.
        reference: String,
        /// Why the reference was rejected.
        reason: String,
    },

    /// Blob upload failed.
    #[error("Failed to upload blob {digest}: {message}")]
    UploadFailed {
        /// Digest of the blob.
        digest: String,
        /// Error message.
        message: String,
    },

    /// Manifest push failed.
    #[error("Failed to push manifest for {reference}: {message}")]
    ManifestPushFailed {
        /// Image reference.
        reference: String,
        /// Error message.
        message: String,
    },

    /// A layer could not be decoded back into a policy.
    #[error("Failed to decode policy layer {digest}: {source}")]
    PolicyDecode {
        /// Digest of the layer.
        digest: String,
        /// Underlying error.
        #[source]
        source: dike_core::Error,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else if err.is_status() {
            let status = err.status().map_or(0, |s| s.as_u16());
            Self::HttpError {
                status,
                message: err.to_string(),
            }
        } else {
            Self::HttpError {
                status: 0,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = RegistryError::NotFound {
            reference: "registry.example.com/policies:v1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Image not found: registry.example.com/policies:v1"
        );
    }

    #[test]
    fn test_error_display_checksum_mismatch() {
        let err = RegistryError::ChecksumMismatch {
            expected: "sha256:abc123".to_string(),
            actual: "sha256:def456".to_string(),
        };
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_error_display_invalid_reference() {
        let err = RegistryError::InvalidReference {
            reference: "Registry/Policies".to_string(),
            reason: "repository must be lowercase".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid reference format 'Registry/Policies': repository must be lowercase"
        );
    }
}
