//! TrendScout CLI: track trending open-source projects and send summarized digests.
//!
//! Fetches a trending listing, filters out what was already seen or does not
//! qualify, summarizes the rest with AI providers and delivers a digest.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
