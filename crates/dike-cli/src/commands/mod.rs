//! CLI commands and argument parsing.

pub mod pull;
pub mod push;
pub mod registry;
pub mod validate;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Dike - Package policies as OCI images
#[derive(Parser)]
#[command(name = "dike")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Package policies as an image and push it to a registry
    Push(push::PushArgs),

    /// Fetch a policy image and write its policies to disk
    Pull(pull::PullArgs),

    /// Load and validate policies without pushing
    Validate(validate::ValidateArgs),

    /// Print version information
    Version,
}

/// Returns a token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}
