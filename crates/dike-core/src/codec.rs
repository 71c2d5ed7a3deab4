//! Canonical text encoding of policies.
//!
//! A policy is stored as a YAML document whose mapping keys are sorted at
//! every level, so the same policy always produces the same bytes and
//! therefore the same layer digest.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::policy::Policy;

/// Encodes a policy into its canonical YAML form.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the policy contains values YAML cannot
/// represent.
///
/// # Examples
///
/// ```rust
/// use dike_core::{codec, Policy, PolicyKind};
/// use serde_json::json;
///
/// let policy = Policy::new(PolicyKind::ClusterPolicy, "require-labels", json!({ "rules": [] }));
/// let bytes = codec::to_canonical_yaml(&policy)?;
/// assert_eq!(codec::from_canonical_yaml(&bytes)?, policy);
/// # Ok::<(), dike_core::Error>(())
/// ```
pub fn to_canonical_yaml(policy: &Policy) -> Result<Vec<u8>> {
    let failure = |reason: String| Error::Serialization {
        policy: policy.name().to_string(),
        reason,
    };

    let value = serde_json::to_value(policy)
        .map_err(|e| failure(format!("converting policy to json: {e}")))?;
    let yaml = serde_yaml::to_string(&canonicalize(value))
        .map_err(|e| failure(format!("converting json to yaml: {e}")))?;

    Ok(yaml.into_bytes())
}

/// Decodes a policy from canonical YAML bytes.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the bytes are not a policy document.
pub fn from_canonical_yaml(bytes: &[u8]) -> Result<Policy> {
    serde_yaml::from_slice(bytes).map_err(|e| Error::Serialization {
        policy: "<unknown>".to_string(),
        reason: format!("decoding yaml: {e}"),
    })
}

/// Rebuilds every object with its keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyKind;
    use serde_json::json;

    fn sample() -> Policy {
        Policy::new(
            PolicyKind::Policy,
            "restrict-image-registries",
            json!({
                "validationFailureAction": "Enforce",
                "background": true,
                "rules": [{
                    "name": "validate-registries",
                    "match": { "any": [{ "resources": { "kinds": ["Pod"] } }] },
                    "validate": { "pattern": { "spec": { "containers": [{ "image": "registry.example.com/*" }] } } }
                }]
            }),
        )
        .with_namespace("payments")
    }

    #[test]
    fn test_round_trip() {
        let policy = sample();
        let bytes = to_canonical_yaml(&policy).unwrap();
        assert_eq!(from_canonical_yaml(&bytes).unwrap(), policy);
    }

    #[test]
    fn test_output_is_deterministic() {
        let a = to_canonical_yaml(&sample()).unwrap();
        let b = to_canonical_yaml(&sample()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_keys_are_sorted() {
        let text = String::from_utf8(to_canonical_yaml(&sample()).unwrap()).unwrap();
        let top_level: Vec<&str> = text
            .lines()
            .filter(|l| !l.starts_with(' ') && !l.starts_with('-'))
            .filter_map(|l| l.split(':').next())
            .collect();
        assert_eq!(top_level, vec!["apiVersion", "kind", "metadata", "spec"]);

        let background = text.find("background").unwrap();
        let rules = text.find("rules").unwrap();
        let action = text.find("validationFailureAction").unwrap();
        assert!(background < rules && rules < action);
    }

    #[test]
    fn test_ambiguous_strings_survive() {
        let policy = Policy::new(
            PolicyKind::ClusterPolicy,
            "quoted",
            json!({ "rules": [{ "name": "r", "value": "true", "port": "8080", "empty": "" }] }),
        );
        let bytes = to_canonical_yaml(&policy).unwrap();
        assert_eq!(from_canonical_yaml(&bytes).unwrap(), policy);
    }

    #[test]
    fn test_decode_rejects_non_policy() {
        let err = from_canonical_yaml(b"kind: ConfigMap\nmetadata: {}\n").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
