mod cli;
mod commands;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use grantvault_core::config::loader::load_config;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("Invalid configuration")?;
    observability::init_tracing_with_level(&config.logging.level);

    match &cli.command {
        Commands::CheckConfig => commands::config::check(&config),
        Commands::ShowConfig(args) => commands::config::show(&config, args.format)?,
        Commands::Demo(args) => commands::demo::run(&config, args).await?,
    }

    Ok(())
}
