//! phdharvest CLI: harvest doctoral theses from the PPM portal.
//!
//! Scrapes listing pages, downloads the thesis PDFs, extracts fulltext with
//! GROBID and stores the cleaned text in a local database.

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
