//! Probe and ping commands against a remote peer.
//!
//! Both dial with the same upgrade a node performs, so a peer listening with
//! sub-protocols can be reached using its own config file.

use crate::cmd::runtime;
use crate::config::load_config;
use crate::ui;
use p2pnet_types::config::NetworkConfig;
use p2pnet_wire::{open_and_upgrade, Connection, Message, ProtobufCodec, WireResult};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

pub fn cmd_probe(config: Option<PathBuf>, host: &str, port: u16) {
    let config = load_config(config.as_deref());
    let rt = runtime();
    rt.block_on(async {
        let started = Instant::now();
        let mut conn = connect_or_exit(host, port, &config).await;
        let negotiated = match conn.sub_protocol() {
            Some(sub) => format!("{} ({sub})", config.protocol_id.trim_end()),
            None => config.protocol_id.trim_end().to_string(),
        };
        ui::success(&format!(
            "Negotiated {negotiated} with {host}:{port} in {}",
            format_rtt(started.elapsed())
        ));
        conn.close().await;
    });
}

pub fn cmd_ping(config: Option<PathBuf>, host: &str, port: u16, count: u32) {
    let config = load_config(config.as_deref());
    let rt = runtime();
    let failed = rt.block_on(async {
        let mut conn = connect_or_exit(host, port, &config).await;
        ui::success(&format!("Connected to {host}:{port}"));

        let mut received = 0u32;
        let mut total = Duration::ZERO;
        for seq in 1..=count {
            match ping_once(&mut conn).await {
                Ok(Some(rtt)) => {
                    received += 1;
                    total += rtt;
                    ui::kv(&format!("seq={seq}"), &format_rtt(rtt));
                }
                Ok(None) => {
                    ui::error(&format!("seq={seq}: echo did not match the ping"));
                }
                Err(e) => {
                    ui::error(&format!("seq={seq}: {e}"));
                    if e.is_fatal() {
                        break;
                    }
                }
            }
        }
        conn.close().await;

        ui::blank();
        if received > 0 {
            ui::kv("Average", &format_rtt(total / received));
        }
        ui::kv("Received", &format!("{received}/{count}"));
        received < count
    });

    if failed {
        std::process::exit(1);
    }
}

/// Send one ping carrying a fresh nonce and wait for its echo.
///
/// Returns `None` when the peer answered with something other than the
/// exact message it was sent.
async fn ping_once(conn: &mut Connection) -> WireResult<Option<Duration>> {
    let ping = Message::ping().with_key(Uuid::new_v4().as_bytes().to_vec());
    let started = Instant::now();
    conn.send_message(&ProtobufCodec, &ping).await?;
    let echo = conn.receive_message(&ProtobufCodec).await?;
    let rtt = started.elapsed();
    debug!(conn = %conn.id(), ?rtt, "ping echo received");
    Ok((echo == ping).then_some(rtt))
}

async fn connect_or_exit(host: &str, port: u16, config: &NetworkConfig) -> Connection {
    match open_and_upgrade(host, port, config).await {
        Ok(conn) => conn,
        Err(e) => {
            ui::error_with_fix(
                &e.to_string(),
                "Check that the peer is listening and uses the same protocol_id and sub_protocols",
            );
            std::process::exit(1);
        }
    }
}

fn format_rtt(rtt: Duration) -> String {
    format!("{:.2} ms", rtt.as_secs_f64() * 1000.0)
}
