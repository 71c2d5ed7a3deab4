//! # Dike Registry
//!
//! Packages policy documents as OCI images and moves them to and from
//! OCI-compatible registries (Docker Registry, Harbor, ECR, GHCR, etc.).
//!
//! ## Features
//!
//! - **Image assembly**: One content-addressed layer per policy, annotated
//!   with its name, kind and scope
//! - **OCI Distribution API**: Blob upload, manifest push and pull
//! - **Pluggable credentials**: Static, docker `config.json`, or a chain
//! - **Push pipeline**: Load, validate, assemble and publish in one call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dike_registry::{
//!     push_policies, DockerConfigKeychain, PushRequest, RegistryClient, RegistryConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RegistryClient::new(RegistryConfig::new())?;
//!     let request = PushRequest::new("registry.example.com/policies:v1", ["policies/"]);
//!
//!     let outcome = push_policies(
//!         &request,
//!         &client,
//!         &DockerConfigKeychain::from_default_location(),
//!         &CancellationToken::new(),
//!         |event| println!("{event:?}"),
//!     )
//!     .await?;
//!
//!     println!("pushed {}", outcome.digest);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       push_policies                          │
//! │  load ──► validate ──► ImageBuilder ──► ImageWriter::write   │
//! └──────────────────────────────────────────────────────────────┘
//!                                              │
//!                        ┌─────────────────────┴──────────────┐
//!                        │  RegistryClient + CredentialResolver │
//!                        └─────────────────────┬──────────────┘
//!                                              ▼
//!                                        OCI Registry
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod config;
mod credentials;
mod error;
mod image;
mod oci;
mod push;
mod reference;

pub use client::RegistryClient;
pub use config::{RegistryAuth, RegistryConfig, TlsConfig};
pub use credentials::{ChainResolver, CredentialResolver, DockerConfigKeychain, StaticCredentials};
pub use error::RegistryError;
pub use image::{
    policy_annotations, Addendum, ImageBuilder, Layer, PolicyImage, ANNOTATION_KIND,
    ANNOTATION_NAME, ANNOTATION_SCOPE,
};
pub use oci::{sha256_digest, Descriptor, ErrorResponse, Manifest, MediaType, RegistryApiError};
pub use push::{
    assemble_image, push_policies, ImageWriter, PushError, PushEvent, PushOutcome, PushPhase,
    PushRequest,
};
pub use reference::{Reference, DEFAULT_REGISTRY, DEFAULT_TAG};
