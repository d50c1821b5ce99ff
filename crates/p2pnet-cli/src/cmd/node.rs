//! Listen command: run a node until interrupted.

use crate::cmd::runtime;
use crate::config::load_config;
use crate::ui;
use p2pnet_wire::{Dispatcher, MemoryPeerStore, Node, ProtobufCodec};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

pub fn cmd_listen(config: Option<PathBuf>, addr: Option<SocketAddr>) {
    let mut config = load_config(config.as_deref());
    if let Some(addr) = addr {
        config.listen_addr = addr;
    }

    let rt = runtime();
    rt.block_on(async {
        let peers = MemoryPeerStore::new();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(ProtobufCodec)));
        let (node, accept) = match Node::start(config, dispatcher, Arc::new(peers.clone())).await
        {
            Ok(started) => started,
            Err(e) => {
                ui::error_with_fix(
                    &format!("Failed to start node: {e}"),
                    "Check listen_addr and protocol_id in the config, or pass --addr",
                );
                std::process::exit(1);
            }
        };

        ui::banner();
        ui::blank();
        ui::kv("Listening", &node.local_addr().to_string());
        ui::kv("Protocol", node.config().protocol_id.trim_end());
        if !node.config().sub_protocols.is_empty() {
            let subs: Vec<&str> = node
                .config()
                .sub_protocols
                .iter()
                .map(|p| p.trim_end())
                .collect();
            ui::kv("Upgrades", &subs.join(", "));
        }

        if !node.config().bootstrap_peers.is_empty() {
            let connected = node.bootstrap().await;
            ui::kv(
                "Bootstrap",
                &format!(
                    "{connected}/{} peers",
                    node.config().bootstrap_peers.len()
                ),
            );
        }
        ui::blank();
        ui::hint("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            ui::error(&format!("Failed to wait for Ctrl+C: {e}"));
        }
        accept.abort();

        ui::blank();
        ui::success(&format!(
            "Stopped ({} peers seen, {} still connected)",
            peers.total_count(),
            peers.connected_count()
        ));
    });
}
