//! Clap CLI definitions for p2pnet.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  p2pnet listen                      Accept peers on the configured address
  p2pnet listen --addr 0.0.0.0:4001  Accept peers on all interfaces
  p2pnet probe 10.0.0.2 4001         Check that a peer completes the handshake
  p2pnet ping 10.0.0.2 4001 -c 5     Measure round trips to a peer
  p2pnet config                      Print the effective configuration";

/// p2pnet: multistream negotiation and framed messaging between peers.
#[derive(Parser)]
#[command(name = "p2pnet", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for peers and answer their messages until Ctrl+C.
    Listen {
        /// Override the configured listen address.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Connect to a peer and run the handshake only.
    Probe {
        /// Peer host name or IP address.
        host: String,
        /// Peer TCP port.
        port: u16,
    },
    /// Send Ping messages to a peer and check each echo.
    Ping {
        /// Peer host name or IP address.
        host: String,
        /// Peer TCP port.
        port: u16,
        /// Number of pings to send.
        #[arg(long, short = 'c', default_value_t = 4)]
        count: u32,
    },
    /// Print the effective configuration as TOML.
    Config,
}
