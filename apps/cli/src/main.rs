//! Quarry CLI: multi-provider research with reconciled, cited reports.
//!
//! Fans a query out to several LLM research providers, merges their
//! findings, and renders a Typst report. Runs one-off jobs or serves the
//! HTTP/WebSocket API.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // Provider keys commonly live in a local .env; absence is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
