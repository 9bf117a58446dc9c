//! Newsdesk - Main Entry Point
//!
//! Command-line client for the news-publishing platform.

use clap::Parser;
use tracing::info;

use newsdesk_lib::{cli, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = args.config();

    // Initialize logging
    logging::init(&config.log_dir());
    info!("Newsdesk starting against {}", config.api_url);

    cli::run(args, config).await
}
