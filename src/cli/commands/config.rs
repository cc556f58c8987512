//! Implementation of the `clinical-orchestrator config` command.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::Path;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output format; --json implies json
    #[arg(long, value_enum, default_value = "yaml")]
    pub format: ConfigFormat,
}

fn render(config: &Config, format: ConfigFormat) -> Result<String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).context("Failed to render YAML"),
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to render JSON")
        }
    }
}

/// Print the merged configuration. Does not install logging or contact the
/// backend.
pub fn execute(args: &ConfigArgs, root: &Path, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_from_dir(root)?;
    let format = if json_mode {
        ConfigFormat::Json
    } else {
        args.format
    };
    println!("{}", render(&config, format)?);
    Ok(())
}
