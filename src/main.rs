mod app;
mod cli;
mod config;
mod db;
mod http;
mod logging;
mod paths;
mod player;
mod store;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::init_tracing(cli.log_level)?;
    app::run(cli)
}
