pub mod config;
pub mod files;
pub mod flags;
pub mod synthetic;

use anyhow::{Context, Result};
use gputrace_recorder::RecorderConfig;
use std::path::Path;

/// Environment-derived config, overridden by `path` when given
pub fn load_config(path: Option<&Path>) -> Result<RecorderConfig> {
    let config = match path {
        Some(path) => RecorderConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RecorderConfig::from_env(),
    };
    config.validate().context("Invalid recorder configuration")?;
    Ok(config)
}
