use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Project configuration file name
pub const CONFIG_FILE_NAME: &str = "modload.toml";

/// Nearest `modload.toml` in `start_dir` or one of its ancestors, else the
/// global config when it exists
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
        .or_else(|| global_config_path().filter(|global| global.is_file()))
}

/// `~/.config/modload/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/modload/config.toml"))
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path. Otherwise,
/// auto-discovers config by traversing up the directory tree from cwd.
///
/// Returns the default configuration (and no path) if nothing is found.
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(config_path) = explicit_path {
        return Ok((Config::from_file(config_path)?, Some(config_path.to_path_buf())));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    match discover_config(&current_dir) {
        Some(discovered) => {
            tracing::debug!(config = %discovered.display(), "using discovered configuration");
            Ok((Config::from_file(&discovered)?, Some(discovered)))
        }
        None => Ok((Config::default(), None)),
    }
}
