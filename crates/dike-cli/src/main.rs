//! Dike CLI - Packages policy documents as OCI images.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dike_core=info,dike_registry=info,dike_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Push(args) => commands::push::execute(args).await,
        Commands::Pull(args) => commands::pull::execute(args).await,
        Commands::Validate(args) => commands::validate::run(&args),
        Commands::Version => {
            println!("dike {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
