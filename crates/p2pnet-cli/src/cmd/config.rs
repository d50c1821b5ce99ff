//! Config command.

use crate::config::{default_config_path, load_config};
use crate::ui;
use p2pnet_types::config::NetworkConfig;
use std::path::PathBuf;

pub fn cmd_config_show(config: Option<PathBuf>) {
    let path = config.clone().unwrap_or_else(default_config_path);
    let effective = load_config(config.as_deref());
    match render(&effective, &path) {
        Ok(text) => print!("{text}"),
        Err(e) => {
            ui::error(&format!("Failed to render configuration: {e}"));
            std::process::exit(1);
        }
    }
}

fn render(config: &NetworkConfig, path: &std::path::Path) -> Result<String, toml::ser::Error> {
    let body = toml::to_string_pretty(config)?;
    Ok(format!("# effective configuration ({})\n{body}", path.display()))
}
