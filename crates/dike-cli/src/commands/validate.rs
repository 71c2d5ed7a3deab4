//! Validate command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use dike_core::{load_policies, validate_all, Validate};

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Policy file or directory; repeatable
    #[arg(short, long = "policy", value_name = "PATH", required = true)]
    pub policies: Vec<PathBuf>,

    /// Show every policy checked
    #[arg(short, long)]
    pub verbose: bool,
}

/// Runs the validate command.
///
/// Every policy is checked so that all problems are reported at once.
///
/// # Errors
///
/// Returns an error if loading fails, no policy is found, or any policy is
/// invalid.
pub fn run(args: &ValidateArgs) -> Result<()> {
    info!(paths = args.policies.len(), "Validating policies");

    let policies =
        load_policies(args.policies.as_slice()).context("Failed to load policies")?;
    if policies.is_empty() {
        anyhow::bail!("No policies found");
    }

    let mut invalid = 0;
    for policy in &policies {
        match policy.validate() {
            Ok(()) => {
                if args.verbose {
                    println!("✓ {} {}", policy.kind, policy.name());
                }
            }
            Err(errors) => {
                invalid += 1;
                println!("✗ {} {}: {errors}", policy.kind, policy.name());
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} of {} policies are invalid", policies.len());
    }
    validate_all(&policies)?;

    println!("Validated {} policies", policies.len());
    Ok(())
}
