//! etlflow CLI: run batch pipelines from the command line.
//!
//! Ships the Wikipedia city pipeline: normalize city names, fetch their
//! parse trees and expand each city into the cities of its county.

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
