//! Command implementations by domain.

pub mod config;
pub mod node;
pub mod peer;

use crate::ui;

/// Build the multi-threaded runtime a command runs on.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}
