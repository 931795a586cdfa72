//! notesync CLI - Offline-first notes, synced to GitHub
//!
//! Usage:
//!   ns add "Title" -b "body"   - Capture a note (syncs in the background)
//!   ns sync                    - Push queued changes, then pull remote ones
//!   ns status                  - Show auth, repository, network and queue status
//!   ns watch                   - Keep syncing until Ctrl-C

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("notesync={}", log_level).parse()?)
                .add_directive(format!("ns={}", log_level).parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    cli::commands::run(cli).await
}
