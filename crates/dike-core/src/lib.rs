//! # Dike Core
//!
//! Core types for packaging policy documents as OCI artifacts.
//!
//! This crate covers everything that happens before a policy reaches a
//! registry:
//!
//! - [`Policy`] - Cluster-scoped or namespaced policy document
//! - [`loader`] - Reading policies from files and directories
//! - [`validation`] - Structural checks applied before packaging
//! - [`codec`] - Deterministic YAML encoding used as layer content
//!
//! ## Example
//!
//! ```rust
//! use dike_core::{codec, validation::Validate, Policy, PolicyKind};
//! use serde_json::json;
//!
//! let policy = Policy::new(
//!     PolicyKind::ClusterPolicy,
//!     "require-labels",
//!     json!({ "rules": [{ "name": "check-team" }] }),
//! );
//! assert!(policy.is_valid());
//!
//! let layer_bytes = codec::to_canonical_yaml(&policy)?;
//! assert_eq!(codec::from_canonical_yaml(&layer_bytes)?, policy);
//! # Ok::<(), dike_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod loader;
pub mod policy;
pub mod validation;


pub use error::{Error, LoadError, LoadFailure, Result};
pub use loader::load_policies;
pub use policy::{Policy, PolicyKind, PolicyScope};
pub use validation::{validate_all, Validate, ValidationError, ValidationErrors};
