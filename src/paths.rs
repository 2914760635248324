//! Path resolution for the charm's own files
//!
//! # Environment Variables
//!
//! - `LICENSE_AGENT_CHARM_CONFIG` - Override the config file location
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` on the command line
//! 2. `LICENSE_AGENT_CHARM_CONFIG` environment variable
//! 3. `/etc/license-agent-charm/config.toml`

use std::path::{Path, PathBuf};

/// Environment variable for config file override
pub const ENV_CONFIG_FILE: &str = "LICENSE_AGENT_CHARM_CONFIG";

/// Default config file location
pub const DEFAULT_CONFIG_FILE: &str = "/etc/license-agent-charm/config.toml";

/// Resolve the config file path
pub fn config_file(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        log::debug!("Using config file from --config: {}", path.display());
        return expand(&path.to_string_lossy());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
        let path = expand(&path);
        log::debug!("Using config file from {}: {}", ENV_CONFIG_FILE, path.display());
        return path;
    }

    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Expand `~` and environment variables in a path
///
/// Unknown variables are left as they are.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
