//! Configuration loading from `~/.p2pnet/config.toml` with defaults.

use p2pnet_types::config::NetworkConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load configuration from `path`, or from the default location.
///
/// A missing, unreadable or malformed file is not an error: it is logged and
/// the defaults are used instead.
pub fn load_config(path: Option<&Path>) -> NetworkConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return NetworkConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<NetworkConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                NetworkConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            NetworkConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    p2pnet_home().join("config.toml")
}

/// Get the default p2pnet home directory.
pub fn p2pnet_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".p2pnet")
}
