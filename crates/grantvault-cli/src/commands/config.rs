use anyhow::{Context, Result};
use grantvault_core::GrantConfig;

use crate::cli::OutputFormat;
use crate::output::{print_step, print_success};

pub fn check(config: &GrantConfig) {
    print_success("configuration is valid");
    print_step("Issuer", &config.issuer);
    print_step("Storage", &format!("{:?}", config.storage.strategy).to_lowercase());
    print_step(
        "Code cache",
        if config.cache.enabled { "enabled" } else { "disabled" },
    );
}

pub fn show(config: &GrantConfig, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Toml => {
            toml::to_string_pretty(config).context("Failed to render configuration as TOML")?
        }
        OutputFormat::Json => serde_json::to_string_pretty(config)
            .context("Failed to render configuration as JSON")?,
    };
    println!("{rendered}");
    Ok(())
}
