//! p2pnet CLI: run a listening node, probe peers, and ping them.

mod cli;
mod cmd;
mod config;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;

fn init_tracing_stderr(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr(cli.log_json);

    match cli.command {
        Commands::Listen { addr } => cmd::node::cmd_listen(cli.config, addr),
        Commands::Probe { host, port } => cmd::peer::cmd_probe(cli.config, &host, port),
        Commands::Ping { host, port, count } => {
            cmd::peer::cmd_ping(cli.config, &host, port, count)
        }
        Commands::Config => cmd::config::cmd_config_show(cli.config),
    }
}
