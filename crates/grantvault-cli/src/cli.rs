use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "grantvault")]
#[command(about = "Grantvault CLI: inspect configuration and exercise grant lifecycles")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./grantvault.toml when present)
    #[arg(short, long, global = true, env = "GRANTVAULT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Toml,
    Json,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum DemoStrategy {
    /// Process-local grant index
    #[default]
    Memory,
    /// Write-through token records
    Persistent,
    /// Authorization codes kept in the snapshot cache until exchange
    Cached,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    CheckConfig,
    /// Print the effective configuration after environment overrides
    ShowConfig(ShowConfigArgs),
    /// Run an authorization-code lifecycle against in-process backends
    Demo(DemoArgs),
}

#[derive(clap::Args)]
pub struct ShowConfigArgs {
    /// Output format
    #[arg(short, long, default_value = "toml")]
    pub format: OutputFormat,
}

#[derive(clap::Args)]
pub struct DemoArgs {
    /// Storage strategy to run against (overrides the configuration)
    #[arg(short, long)]
    pub strategy: Option<DemoStrategy>,
    /// Client id used for the demo grant
    #[arg(long, default_value = "demo-client")]
    pub client_id: String,
    /// Scopes requested for the demo grant
    #[arg(long, default_value = "openid profile")]
    pub scope: String,
    /// Replay the authorization code after the exchange
    #[arg(long)]
    pub replay: bool,
    /// Register the demo client for JWT access tokens
    #[arg(long)]
    pub jwt_access_tokens: bool,
    /// Print token issuance counters in Prometheus format when done
    #[arg(long)]
    pub metrics: bool,
}
