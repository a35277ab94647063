//! Configuration loading shared by every command

use anyhow::{Context, Result};
use baton_core::{BatonConfig, ConfigValidation};
use std::path::Path;

/// Defaults, then the file if given, then `BATON_*` overrides, then validation
pub fn load_config(path: Option<&Path>) -> Result<BatonConfig> {
    let mut config = match path {
        Some(path) => BatonConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BatonConfig::default(),
    };
    config.merge_with_env()?;
    config.validate()?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}
