//! Push command implementation.
//!
//! Packages policy files as an OCI image and writes it to a registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use dike_core::PolicyScope;
use dike_registry::{push_policies, PushError, PushEvent, PushPhase, PushRequest, RegistryClient};

use super::registry::RegistryArgs;

/// Arguments for the push command.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Policy file or directory; repeatable
    #[arg(short, long = "policy", value_name = "PATH", required = true)]
    pub policies: Vec<PathBuf>,

    /// Destination image (e.g., `registry.example.com/policies:v1`)
    #[arg(short, long, env = "DIKE_IMAGE")]
    pub image: Option<String>,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Runs the push command.
///
/// # Errors
///
/// Returns an error naming the phase that failed: reading the reference,
/// loading, validating, assembling or writing the image.
pub async fn execute(args: PushArgs) -> Result<()> {
    info!(image = ?args.image, paths = args.policies.len(), "Pushing policies");

    let request = PushRequest {
        paths: args.policies,
        reference: args.image.unwrap_or_default(),
    };
    request.parse_reference().map_err(failure)?;

    let client =
        RegistryClient::new(args.registry.config()).context("Failed to create registry client")?;
    let credentials = args.registry.credentials()?;

    let cancel = super::cancel_on_ctrl_c();
    let outcome = push_policies(&request, &client, &credentials, &cancel, |event| {
        if let Some(line) = describe(event) {
            eprintln!("{line}");
        }
    })
    .await
    .map_err(failure)?;

    println!("{}@{}", outcome.reference, outcome.digest);
    Ok(())
}

/// Names the phase a push failed in; input errors are reported as they are.
fn failure(err: PushError) -> anyhow::Error {
    match err.phase() {
        PushPhase::Idle => anyhow::Error::new(err),
        phase => anyhow::Error::new(err).context(format!("push failed while {phase}")),
    }
}

/// Renders a progress event for the terminal.
fn describe(event: &PushEvent) -> Option<String> {
    match event {
        PushEvent::PolicyAdded {
            name,
            scope: PolicyScope::Cluster,
            ..
        } => Some(format!("Adding cluster policy {name}...")),
        PushEvent::PolicyAdded { name, .. } => Some(format!("Adding policy {name}...")),
        PushEvent::Uploading { reference } => Some(format!("Uploading [{reference}]...")),
        PushEvent::Done { .. } => Some("Done.".to_string()),
        PushEvent::Phase(_) => None,
    }
}
