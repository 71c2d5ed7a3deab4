//! Policy validation.
//!
//! Every loaded policy goes through [`Validate`] before it is packaged. The
//! checks cover the API conventions a puller relies on: a well-formed API
//! version, a DNS-compatible name, scope-consistent namespace, and a spec
//! carrying uniquely named rules.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::policy::{Policy, PolicyKind};

/// Maximum length of a policy name.
pub const MAX_NAME_LENGTH: usize = 63;

/// Maximum length of a namespace name.
const MAX_NAMESPACE_LENGTH: usize = 63;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation (e.g. `metadata.name`).
    pub field: String,
    /// A human-readable description of the failure.
    pub message: String,
    /// The kind of validation that failed.
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    /// Creates a new validation error.
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        kind: ValidationErrorKind,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind,
        }
    }

    /// Creates a validation error for a required field that is missing.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("'{field}' is required but was not provided"),
            field,
            kind: ValidationErrorKind::Required,
        }
    }

    /// Creates a validation error for an invalid format.
    pub fn format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, ValidationErrorKind::Format)
    }

    /// Creates a validation error for an empty collection.
    pub fn empty(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("'{field}' must not be empty"),
            field,
            kind: ValidationErrorKind::Empty,
        }
    }

    /// Creates a validation error for a constraint violation.
    pub fn constraint(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, ValidationErrorKind::Constraint)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error for '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// The category of validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// A required field was not provided.
    Required,
    /// The value format is invalid.
    Format,
    /// A collection is empty when it shouldn't be.
    Empty,
    /// A policy constraint was violated.
    Constraint,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Format => write!(f, "format"),
            Self::Empty => write!(f, "empty"),
            Self::Constraint => write!(f, "constraint"),
        }
    }
}

/// A collection of validation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Creates an empty validation errors collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validation error to the collection.
    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Returns true if there are no validation errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of validation errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns an iterator over the validation errors.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Converts to a Result: `Ok(())` when empty, `Err(self)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `self` if any error was recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no validation errors"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} validation errors: ", many.len())?;
                for (i, error) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

impl FromIterator<ValidationError> for ValidationErrors {
    fn from_iter<T: IntoIterator<Item = ValidationError>>(iter: T) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

/// Trait for types that can be validated.
pub trait Validate {
    /// Validates this instance and returns every failure found.
    ///
    /// # Errors
    ///
    /// Returns `ValidationErrors` containing all validation failures found.
    fn validate(&self) -> std::result::Result<(), ValidationErrors>;

    /// Returns true if this instance is valid.
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl Validate for Policy {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        check_api_version(&self.api_version, &mut errors);

        match self.metadata.name.as_deref() {
            None | Some("") => errors.add(ValidationError::required("metadata.name")),
            Some(name) => {
                if name.len() > MAX_NAME_LENGTH {
                    errors.add(ValidationError::format(
                        "metadata.name",
                        format!("must be no more than {MAX_NAME_LENGTH} characters"),
                    ));
                }
                if !is_dns_subdomain(name) {
                    errors.add(ValidationError::format(
                        "metadata.name",
                        format!("'{name}' must consist of lower case alphanumeric characters, '-' or '.'"),
                    ));
                }
            }
        }

        match (self.kind, self.namespace()) {
            (PolicyKind::ClusterPolicy, Some(ns)) if !ns.is_empty() => {
                errors.add(ValidationError::constraint(
                    "metadata.namespace",
                    "cluster-scoped policies must not set a namespace",
                ));
            }
            (PolicyKind::Policy, Some(ns)) if !ns.is_empty() && !is_dns_label(ns, MAX_NAMESPACE_LENGTH) => {
                errors.add(ValidationError::format(
                    "metadata.namespace",
                    format!("'{ns}' is not a valid namespace name"),
                ));
            }
            _ => {}
        }

        check_rules(self, &mut errors);

        errors.into_result()
    }
}

fn check_api_version(api_version: &str, errors: &mut ValidationErrors) {
    if api_version.is_empty() {
        errors.add(ValidationError::required("apiVersion"));
        return;
    }
    let well_formed = api_version
        .split_once('/')
        .is_some_and(|(group, version)| {
            !group.is_empty() && !version.is_empty() && !version.contains('/')
        });
    if !well_formed {
        errors.add(ValidationError::format(
            "apiVersion",
            format!("'{api_version}' must have the form <group>/<version>"),
        ));
    }
}

fn check_rules(policy: &Policy, errors: &mut ValidationErrors) {
    if !policy.spec.is_object() {
        errors.add(ValidationError::format("spec", "must be a mapping"));
        return;
    }
    let Some(rules) = policy.rules() else {
        errors.add(ValidationError::required("spec.rules"));
        return;
    };
    if rules.is_empty() {
        errors.add(ValidationError::empty("spec.rules"));
        return;
    }

    let mut seen = HashSet::new();
    for (i, rule) in rules.iter().enumerate() {
        let field = format!("spec.rules[{i}].name");
        match rule.get("name").and_then(serde_json::Value::as_str) {
            None | Some("") => errors.add(ValidationError::required(field)),
            Some(name) => {
                if !seen.insert(name) {
                    errors.add(ValidationError::constraint(
                        field,
                        format!("duplicate rule name '{name}'"),
                    ));
                }
            }
        }
    }
}

/// Returns true if `value` is an RFC 1123 label of at most `max` characters.
fn is_dns_label(value: &str, max: usize) -> bool {
    !value.is_empty()
        && value.len() <= max
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

/// Returns true if `value` is an RFC 1123 subdomain.
fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= 253 && value.split('.').all(|label| is_dns_label(label, 63))
}

/// Validates a whole policy set.
///
/// Fails on the first invalid policy, naming it. Two policies with the same
/// kind, namespace and name are rejected since a puller could not tell them
/// apart.
///
/// # Errors
///
/// Returns [`Error::Validation`] identifying the offending policy.
pub fn validate_all(policies: &[Policy]) -> Result<()> {
    let mut identities = HashSet::new();

    for policy in policies {
        policy.validate().map_err(|source| Error::Validation {
            policy: policy.name().to_string(),
            source,
        })?;

        if !identities.insert((policy.kind, policy.namespace(), policy.name())) {
            return Err(Error::Validation {
                policy: policy.name().to_string(),
                source: std::iter::once(ValidationError::constraint(
                    "metadata.name",
                    format!(
                        "{} '{}' appears more than once",
                        policy.kind,
                        policy.name()
                    ),
                ))
                .collect(),
            });
        }

        tracing::debug!(policy = policy.name(), kind = %policy.kind, "Policy is valid");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_policy() -> Policy {
        Policy::new(
            PolicyKind::ClusterPolicy,
            "require-labels",
            json!({ "rules": [{ "name": "check-team" }] }),
        )
    }

    #[test]
    fn test_valid_policy() {
        assert!(valid_policy().is_valid());
    }

    #[test]
    fn test_missing_name() {
        let mut policy = valid_policy();
        policy.metadata.name = None;

        let errors = policy.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        let error = errors.iter().next().unwrap();
        assert_eq!(error.field, "metadata.name");
        assert_eq!(error.kind, ValidationErrorKind::Required);
    }

    #[test]
    fn test_name_format() {
        let mut policy = valid_policy();
        policy.metadata.name = Some("Require_Labels".to_string());
        assert!(!policy.is_valid());

        policy.metadata.name = Some("a".repeat(MAX_NAME_LENGTH + 1));
        assert!(!policy.is_valid());

        policy.metadata.name = Some("team.require-labels".to_string());
        assert!(policy.is_valid());
    }

    #[test]
    fn test_api_version_format() {
        for bad in ["", "v1", "kyverno.io/", "/v1", "a/b/c"] {
            let policy = valid_policy().with_api_version(bad);
            assert!(!policy.is_valid(), "{bad:?} should be rejected");
        }
        assert!(valid_policy().with_api_version("kyverno.io/v2beta1").is_valid());
    }

    #[test]
    fn test_cluster_policy_with_namespace() {
        let policy = valid_policy().with_namespace("default");
        let errors = policy.validate().unwrap_err();
        assert_eq!(
            errors.iter().next().map(|e| e.kind),
            Some(ValidationErrorKind::Constraint)
        );
    }

    #[test]
    fn test_namespaced_policy_namespace_format() {
        let policy = Policy::new(
            PolicyKind::Policy,
            "restrict-image-registries",
            json!({ "rules": [{ "name": "r" }] }),
        );
        assert!(policy.clone().with_namespace("payments").is_valid());
        assert!(!policy.with_namespace("Payments").is_valid());
    }

    #[test]
    fn test_rules_required() {
        let mut policy = valid_policy();
        policy.spec = json!({});
        assert!(!policy.is_valid());

        policy.spec = json!({ "rules": [] });
        let errors = policy.validate().unwrap_err();
        assert_eq!(
            errors.iter().next().map(|e| e.kind),
            Some(ValidationErrorKind::Empty)
        );

        policy.spec = json!("rules");
        assert!(!policy.is_valid());
    }

    #[test]
    fn test_rule_names() {
        let mut policy = valid_policy();
        policy.spec = json!({ "rules": [{ "name": "a" }, { "name": "a" }, {}] });

        let errors = policy.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["spec.rules[1].name", "spec.rules[2].name"]);
    }

    #[test]
    fn test_validation_errors_display() {
        let errors: ValidationErrors = vec![
            ValidationError::required("a"),
            ValidationError::empty("b"),
        ]
        .into_iter()
        .collect();
        let display = errors.to_string();
        assert!(display.starts_with("2 validation errors: "));
        assert!(display.contains("'a'"));
        assert!(display.contains("'b'"));
    }

    #[test]
    fn test_validate_all_names_offending_policy() {
        let mut broken = valid_policy();
        broken.metadata.name = Some("broken".to_string());
        broken.spec = json!({ "rules": [] });

        let err = validate_all(&[valid_policy(), broken]).unwrap_err();
        match err {
            Error::Validation { policy, .. } => assert_eq!(policy, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_all_duplicates() {
        let err = validate_all(&[valid_policy(), valid_policy()]).unwrap_err();
        assert!(err.to_string().contains("appears more than once"));

        let namespaced = Policy::new(
            PolicyKind::Policy,
            "require-labels",
            json!({ "rules": [{ "name": "check-team" }] }),
        )
        .with_namespace("payments");
        assert!(validate_all(&[valid_policy(), namespaced]).is_ok());
    }
}
