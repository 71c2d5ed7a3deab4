//! Loading policies from files and directories.
//!
//! A source path may be a single file or a directory, which is walked
//! recursively. Each file may hold several YAML (or JSON) documents;
//! documents whose `kind` is not a policy kind are ignored.
//!
//! Symbolic links are followed, so directories mounted from a `ConfigMap`
//! load like plain ones. Mapping keys that are not strings (`80: allowed`)
//! are read as their string form.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{LoadError, LoadFailure};
use crate::policy::{Policy, PolicyKind};

/// File extensions considered policy sources when walking directories.
pub const POLICY_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Loads every policy found under the given paths.
///
/// Directories are walked in sorted order so the result is stable. Policies
/// are returned in the order they were found.
///
/// # Errors
///
/// Returns a [`LoadError`] aggregating every failure. If any source fails,
/// no policies are returned.
pub fn load_policies<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Policy>, LoadError> {
    let mut policies = Vec::new();
    let mut failures = Vec::new();

    for path in paths {
        let path = path.as_ref();
        for file in collect_files(path, &mut failures) {
            match std::fs::read_to_string(&file) {
                Ok(content) => {
                    policies.extend(parse_documents(&file, &content, &mut failures));
                }
                Err(source) => failures.push(LoadFailure::Io { path: file, source }),
            }
        }
    }

    if !failures.is_empty() {
        return Err(LoadError::new(failures));
    }

    info!(count = policies.len(), "Loaded policies");
    Ok(policies)
}

/// Loads policies from an in-memory source, as if read from `origin`.
///
/// # Errors
///
/// Returns a [`LoadError`] if any document fails to parse or decode.
pub fn load_policies_from_str(origin: &Path, content: &str) -> Result<Vec<Policy>, LoadError> {
    let mut failures = Vec::new();
    let policies = parse_documents(origin, content, &mut failures);
    if failures.is_empty() {
        Ok(policies)
    } else {
        Err(LoadError::new(failures))
    }
}

fn collect_files(path: &Path, failures: &mut Vec<LoadFailure>) -> Vec<PathBuf> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(source) => {
            failures.push(LoadFailure::Io {
                path: path.to_path_buf(),
                source,
            });
            return Vec::new();
        }
    };

    if !metadata.is_dir() {
        return vec![path.to_path_buf()];
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() && has_policy_extension(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(source) => failures.push(LoadFailure::Walk {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
    debug!(path = %path.display(), files = files.len(), "Collected policy files");
    files
}

fn has_policy_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| POLICY_EXTENSIONS.contains(&e))
}

/// Just enough of a document to decide whether it is a policy.
#[derive(Deserialize)]
struct TypeMeta {
    #[serde(default)]
    kind: Option<String>,
}

fn parse_documents(path: &Path, content: &str, failures: &mut Vec<LoadFailure>) -> Vec<Policy> {
    let mut policies = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = match Value::deserialize(document) {
            Ok(value) => value,
            Err(source) => {
                failures.push(LoadFailure::Parse {
                    path: path.to_path_buf(),
                    source,
                });
                // The stream cannot be resynchronized after a syntax error.
                break;
            }
        };

        if value.is_null() {
            continue;
        }
        let value = stringify_keys(value);

        let kind = serde_yaml::from_value::<TypeMeta>(value.clone())
            .ok()
            .and_then(|meta| meta.kind);
        match kind.as_deref().map(str::parse::<PolicyKind>) {
            Some(Ok(_)) => match serde_yaml::from_value::<Policy>(value) {
                Ok(policy) => {
                    debug!(path = %path.display(), policy = policy.name(), "Parsed policy");
                    policies.push(policy);
                }
                Err(e) => failures.push(LoadFailure::Decode {
                    path: path.to_path_buf(),
                    index,
                    reason: e.to_string(),
                }),
            },
            _ => {
                debug!(path = %path.display(), index, kind = ?kind, "Skipping non-policy document");
            }
        }
    }

    policies
}

/// Rewrites scalar mapping keys as strings, at every level.
fn stringify_keys(value: Value) -> Value {
    match value {
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(key, value)| (key_to_string(key), stringify_keys(value)))
                .collect::<Mapping>(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(stringify_keys).collect()),
        Value::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            Value::Tagged(Box::new(TaggedValue {
                tag,
                value: stringify_keys(value),
            }))
        }
        other => other,
    }
}

fn key_to_string(key: Value) -> Value {
    match key {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Null => Value::String("null".to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CLUSTER_POLICY: &str = r"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: require-labels
spec:
  rules:
    - name: check-team
";

    const NAMESPACED_POLICY: &str = r"
apiVersion: kyverno.io/v1
kind: Policy
metadata:
  name: restrict-image-registries
  namespace: payments
spec:
  rules:
    - name: validate-registries
";

    #[test]
    fn test_load_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("policy.yaml");
        fs::write(&file, CLUSTER_POLICY).unwrap();

        let policies = load_policies(&[&file]).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name(), "require-labels");
    }

    #[test]
    fn test_load_directory_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.yaml"), NAMESPACED_POLICY).unwrap();
        fs::write(dir.path().join("a.yml"), CLUSTER_POLICY).unwrap();
        fs::write(dir.path().join("README.md"), "not a policy").unwrap();
        fs::write(
            dir.path().join("nested/c.yaml"),
            CLUSTER_POLICY.replace("require-labels", "nested-policy"),
        )
        .unwrap();

        let policies = load_policies(&[dir.path()]).unwrap();
        let names: Vec<_> = policies.iter().map(Policy::name).collect();
        assert_eq!(
            names,
            vec!["require-labels", "restrict-image-registries", "nested-policy"]
        );
    }

    #[test]
    fn test_multi_document_file_skips_other_kinds() {
        let content = format!(
            "{CLUSTER_POLICY}\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n---\n{NAMESPACED_POLICY}\n---\n"
        );
        let policies = load_policies_from_str(Path::new("bundle.yaml"), &content).unwrap();
        assert_eq!(policies.len(), 2);
        assert!(policies[1].is_namespaced());
    }

    #[test]
    fn test_json_document() {
        let content = r#"{"apiVersion":"kyverno.io/v1","kind":"ClusterPolicy","metadata":{"name":"from-json"},"spec":{"rules":[{"name":"r"}]}}"#;
        let policies = load_policies_from_str(Path::new("p.json"), content).unwrap();
        assert_eq!(policies[0].name(), "from-json");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_files_are_loaded() {
        let source = tempfile::tempdir().unwrap();
        let target = source.path().join("..data-policy.yaml");
        fs::write(&target, CLUSTER_POLICY).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("policy.yaml")).unwrap();

        let policies = load_policies(&[dir.path()]).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name(), "require-labels");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.yaml"), dir.path().join("policy.yaml"))
            .unwrap();

        let err = load_policies(&[dir.path()]).unwrap_err();
        assert!(matches!(err.failures()[0], LoadFailure::Walk { .. }));
    }

    #[test]
    fn test_non_string_keys_become_strings() {
        let content = r"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: allowed-ports
spec:
  rules:
    - name: check-ports
      validate:
        pattern:
          ports:
            80: allowed
            true: yes-key
";
        let policies = load_policies_from_str(Path::new("p.yaml"), content).unwrap();
        let ports = &policies[0].rules().unwrap()[0]["validate"]["pattern"]["ports"];
        assert_eq!(ports["80"], "allowed");
        assert_eq!(ports["true"], "yes-key");
    }

    #[test]
    fn test_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_policies(&[dir.path().join("missing.yaml")]).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(matches!(err.failures()[0], LoadFailure::Io { .. }));
    }

    #[test]
    fn test_errors_are_aggregated_and_nothing_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.yaml"), CLUSTER_POLICY).unwrap();
        fs::write(dir.path().join("bad-syntax.yaml"), "kind: [unclosed").unwrap();
        fs::write(
            dir.path().join("bad-shape.yaml"),
            "apiVersion: kyverno.io/v1\nkind: ClusterPolicy\nmetadata: 12\n",
        )
        .unwrap();

        let err = load_policies(&[dir.path()]).unwrap_err();
        assert_eq!(err.len(), 2);
    }
}
