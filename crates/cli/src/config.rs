//! Configuration file discovery for the CLI

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Pick the configuration file to load
///
/// An explicit path must exist. Without one, the default location is used
/// only when a file is present there.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Configuration file {} does not exist", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let default = default_config_path()?;
    Ok(default.exists().then_some(default))
}

/// `~/.config/costopt/config.toml`
fn default_config_path() -> Result<PathBuf> {
    let home = dirs_next::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("costopt").join("config.toml"))
}
