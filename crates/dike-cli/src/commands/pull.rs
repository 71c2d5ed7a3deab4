//! Pull command implementation.
//!
//! Fetches a policy image and writes each policy back to a YAML file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use dike_core::{codec, Policy};
use dike_registry::{Reference, RegistryClient};

use super::registry::RegistryArgs;

/// Arguments for the pull command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image to pull (e.g., `registry.example.com/policies:v1`)
    #[arg(short, long, env = "DIKE_IMAGE")]
    pub image: String,

    /// Directory the policies are written to
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Runs the pull command.
///
/// # Errors
///
/// Returns an error if the reference is invalid, the image cannot be
/// fetched or decoded, or a file cannot be written.
pub async fn execute(args: PullArgs) -> Result<()> {
    let reference = Reference::parse(&args.image).context("parsing image reference")?;
    info!(reference = %reference, dir = %args.dir.display(), "Pulling policies");

    let client =
        RegistryClient::new(args.registry.config()).context("Failed to create registry client")?;
    let credentials = args.registry.credentials()?;

    let cancel = super::cancel_on_ctrl_c();
    let image = tokio::select! {
        () = cancel.cancelled() => anyhow::bail!("pull of {reference} cancelled"),
        result = client.pull(&reference, &credentials) => {
            result.with_context(|| format!("pulling {reference}"))?
        }
    };

    let policies = image.policies().context("decoding policy layers")?;
    for path in write_policies(&policies, &args.dir)? {
        eprintln!("Wrote {}", path.display());
    }
    eprintln!("Done.");
    Ok(())
}

/// Writes each policy to `<dir>/<name>.yaml` and returns the paths written.
///
/// A name seen earlier in the same image is written as
/// `<namespace>.<name>.yaml` instead of overwriting the earlier file.
fn write_policies(policies: &[Policy], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating directory {}", dir.display()))?;

    let mut used = HashSet::new();
    let mut written = Vec::with_capacity(policies.len());

    for policy in policies {
        let mut file_name = format!("{}.yaml", policy.name());
        if !used.insert(file_name.clone()) {
            file_name = format!("{}.{}", policy.namespace().unwrap_or("cluster"), file_name);
            if !used.insert(file_name.clone()) {
                anyhow::bail!("image contains policy {} more than once", policy.name());
            }
        }

        let path = dir.join(file_name);
        let content = codec::to_canonical_yaml(policy)?;
        std::fs::write(&path, content)
            .with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dike_core::PolicyKind;
    use serde_json::json;

    fn rules() -> serde_json::Value {
        json!({ "rules": [{ "name": "check" }] })
    }

    #[test]
    fn test_write_policies() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let policies = vec![
            Policy::new(PolicyKind::ClusterPolicy, "require-labels", rules()),
            Policy::new(PolicyKind::Policy, "restrict-image-registries", rules())
                .with_namespace("payments"),
        ];

        let written = write_policies(&policies, &out).unwrap();

        assert_eq!(
            written,
            vec![
                out.join("require-labels.yaml"),
                out.join("restrict-image-registries.yaml")
            ]
        );
        let loaded = dike_core::load_policies(&[&out]).unwrap();
        assert_eq!(loaded, policies);
    }

    #[test]
    fn test_write_policies_same_name_different_scope() {
        let dir = tempfile::tempdir().unwrap();
        let policies = vec![
            Policy::new(PolicyKind::ClusterPolicy, "baseline", rules()),
            Policy::new(PolicyKind::Policy, "baseline", rules()).with_namespace("payments"),
        ];

        let written = write_policies(&policies, dir.path()).unwrap();

        assert_eq!(
            written,
            vec![
                dir.path().join("baseline.yaml"),
                dir.path().join("payments.baseline.yaml")
            ]
        );
    }
}
