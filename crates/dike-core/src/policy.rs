//! Policy model and metadata.
//!
//! This module defines the [`Policy`] document: a named rule set that is
//! either cluster-scoped (`ClusterPolicy`) or namespaced (`Policy`).

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Kind of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    /// A policy that applies cluster-wide.
    ClusterPolicy,
    /// A policy that applies to a single namespace.
    Policy,
}

impl PolicyKind {
    /// Returns the kind as it appears in documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClusterPolicy => "ClusterPolicy",
            Self::Policy => "Policy",
        }
    }

    /// Returns the scope this kind implies.
    #[must_use]
    pub const fn scope(self) -> PolicyScope {
        match self {
            Self::ClusterPolicy => PolicyScope::Cluster,
            Self::Policy => PolicyScope::Namespaced,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ClusterPolicy" => Ok(Self::ClusterPolicy),
            "Policy" => Ok(Self::Policy),
            other => Err(format!("'{other}' is not a policy kind")),
        }
    }
}

/// Whether a policy is cluster-scoped or namespaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyScope {
    /// Cluster-scoped.
    Cluster,
    /// Namespaced.
    Namespaced,
}

impl PolicyScope {
    /// Returns the scope label used in layer annotations.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Namespaced => "namespaced",
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy document.
///
/// The rule body in [`Policy::spec`] is opaque to Dike and passed through
/// unmodified.
///
/// # Examples
///
/// ```rust
/// use dike_core::{Policy, PolicyKind, PolicyScope};
/// use serde_json::json;
///
/// let policy = Policy::new(
///     PolicyKind::ClusterPolicy,
///     "require-labels",
///     json!({ "rules": [{ "name": "check-team" }] }),
/// );
/// assert_eq!(policy.name(), "require-labels");
/// assert_eq!(policy.scope(), PolicyScope::Cluster);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// API group and version (e.g. `kyverno.io/v1`).
    pub api_version: String,

    /// Document kind.
    pub kind: PolicyKind,

    /// Object metadata (name, namespace, labels, annotations).
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Rule body.
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Policy {
    /// API version given to policies built with [`Policy::new`].
    pub const DEFAULT_API_VERSION: &'static str = "kyverno.io/v1";

    /// Creates a policy with the default API version.
    #[must_use]
    pub fn new(kind: PolicyKind, name: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            api_version: Self::DEFAULT_API_VERSION.to_string(),
            kind,
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..ObjectMeta::default()
            },
            spec,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    /// Sets the API version.
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Returns the policy name, or an empty string if unset.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Returns the namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Returns true for namespaced policies.
    #[must_use]
    pub const fn is_namespaced(&self) -> bool {
        matches!(self.kind, PolicyKind::Policy)
    }

    /// Returns the policy scope.
    #[must_use]
    pub const fn scope(&self) -> PolicyScope {
        self.kind.scope()
    }

    /// Returns the rule entries of the spec, if the spec carries any.
    #[must_use]
    pub fn rules(&self) -> Option<&Vec<serde_json::Value>> {
        self.spec.get("rules").and_then(serde_json::Value::as_array)
    }
}
