//! Integration tests for a listening node and a dialing peer.
//!
//! Every test starts a real `Node` on a loopback port, dials it with
//! `open_and_negotiate` and drives the connection from the test body. Custom
//! handlers are registered on the node's dispatcher to check that routing
//! handlers see the shared stores.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use p2pnet_types::config::NetworkConfig;
use p2pnet_types::peer::{ConnectionType, PeerInfo};
use p2pnet_types::record::{Keyring, RecordVerifier, SignedRecord};
use p2pnet_wire::{
    open_and_negotiate, open_and_upgrade, Connection, Dispatcher, MemoryPeerStore, MemoryProviderStore, Message,
    MessageHandler, MessageKind, Node, PeerStore, ProtobufCodec, ProtocolId, ProviderStore,
    WireError, WireResult,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Handlers backed by in-memory stores
// ---------------------------------------------------------------------------

/// Answers `GetProviders` with the providers known for the key.
struct ProvidersHandler {
    providers: Arc<dyn ProviderStore>,
}

#[async_trait]
impl MessageHandler for ProvidersHandler {
    async fn handle(&self, conn: &mut Connection, message: Message) -> WireResult<()> {
        let mut reply = Message::new(MessageKind::GetProviders).with_key(message.body.key.clone());
        reply.body.provider_peers = self.providers.providers_for(&message.body.key);
        conn.send_message(&ProtobufCodec, &reply).await?;
        Ok(())
    }
}

/// Accepts `PutValue` records whose signature checks out and echoes them.
struct PutValueHandler {
    verifier: Arc<dyn RecordVerifier>,
    accepted: Arc<Mutex<Vec<SignedRecord>>>,
}

#[async_trait]
impl MessageHandler for PutValueHandler {
    async fn handle(&self, conn: &mut Connection, message: Message) -> WireResult<()> {
        let Some(record) = message.body.record.clone() else {
            return Ok(());
        };
        if !self.verifier.verify(&record) {
            return Ok(());
        }
        self.accepted.lock().unwrap().push(record);
        conn.send_message(&ProtobufCodec, &message).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn loopback_config() -> NetworkConfig {
    NetworkConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        io_timeout_ms: 3_000,
        connect_timeout_ms: 3_000,
        ..NetworkConfig::default()
    }
}

async fn start(config: NetworkConfig) -> (Arc<Node>, Arc<Dispatcher>, MemoryPeerStore) {
    let peers = MemoryPeerStore::new();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(ProtobufCodec)));
    let (node, _accept) = Node::start(config, Arc::clone(&dispatcher), Arc::new(peers.clone()))
        .await
        .unwrap();
    (node, dispatcher, peers)
}

async fn dial(node: &Node) -> Connection {
    open_and_negotiate("127.0.0.1", node.local_addr().port(), node.config())
        .await
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ping_round_trip() {
    let (node, _dispatcher, _peers) = start(loopback_config()).await;
    let mut conn = dial(&node).await;

    for i in 0..5u8 {
        let ping = Message::ping().with_key(vec![i; 16]);
        conn.send_message(&ProtobufCodec, &ping).await.unwrap();
        let echo = conn.receive_message(&ProtobufCodec).await.unwrap();
        assert_eq!(echo, ping);
    }
}

#[tokio::test]
async fn test_unknown_kind_then_ping() {
    let (node, _dispatcher, _peers) = start(loopback_config()).await;
    let mut conn = dial(&node).await;

    conn.send_message(&ProtobufCodec, &Message::new(MessageKind::Unknown(1234)))
        .await
        .unwrap();
    conn.send_frame(&[0xff, 0xff, 0xff]).await.unwrap();
    conn.send_message(&ProtobufCodec, &Message::ping())
        .await
        .unwrap();

    let echo = conn.receive_message(&ProtobufCodec).await.unwrap();
    assert_eq!(echo.kind, MessageKind::Ping);
}

#[tokio::test]
async fn test_peer_store_tracks_lifecycle() {
    let (node, _dispatcher, peers) = start(loopback_config()).await;
    let mut conn = dial(&node).await;
    let local = conn.peer_addr().unwrap();
    assert_eq!(local, node.local_addr());

    eventually(|| peers.connected_count() == 1).await;
    let entry = peers.connected_peers().pop().unwrap();
    assert!(entry.addrs[0].starts_with("/ip4/127.0.0.1/tcp/"));

    assert_eq!(entry.connection, ConnectionType::Connected);

    // Inbound entries are keyed by the dialer's ephemeral port, so they are
    // dropped rather than kept as NotConnected.
    conn.close().await;
    eventually(|| peers.total_count() == 0).await;
    assert!(peers.lookup(&entry.id).is_none());
}

#[tokio::test]
async fn test_sub_protocol_upgrade() {
    let config = NetworkConfig {
        sub_protocols: vec!["/ipfs/kad/1.0.0\n".to_string()],
        ..loopback_config()
    };
    let (node, _dispatcher, _peers) = start(config).await;

    let mut conn = dial(&node).await;
    let kad = ProtocolId::new("/ipfs/kad/1.0.0\n").unwrap();
    conn.select_protocol(&kad).await.unwrap();
    assert_eq!(conn.sub_protocol(), Some(&kad));

    conn.send_message(&ProtobufCodec, &Message::ping())
        .await
        .unwrap();
    assert_eq!(
        conn.receive_message(&ProtobufCodec).await.unwrap(),
        Message::ping()
    );

    // The same configuration on the dialing side performs the upgrade itself.
    let mut upgraded = open_and_upgrade("127.0.0.1", node.local_addr().port(), node.config())
        .await
        .unwrap();
    assert_eq!(upgraded.sub_protocol(), Some(&kad));
    let ping = Message::ping().with_key("after-upgrade");
    upgraded.send_message(&ProtobufCodec, &ping).await.unwrap();
    assert_eq!(upgraded.receive_message(&ProtobufCodec).await.unwrap(), ping);

    let mut other = dial(&node).await;
    let bitswap = ProtocolId::new("/ipfs/bitswap/1.2.0\n").unwrap();
    let err = other.select_protocol(&bitswap).await.unwrap_err();
    match err {
        WireError::ProtocolMismatch { received, .. } => assert_eq!(received, "na\n"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_providers_handler() {
    let (node, dispatcher, _peers) = start(loopback_config()).await;
    let providers = MemoryProviderStore::new();
    providers.add_provider(b"QmContent", PeerInfo::new("provider-a").with_addr("/ip4/10.0.0.7/tcp/4001"));
    dispatcher.register(
        MessageKind::GetProviders,
        Arc::new(ProvidersHandler {
            providers: Arc::new(providers),
        }),
    );

    let mut conn = dial(&node).await;
    conn.send_message(
        &ProtobufCodec,
        &Message::new(MessageKind::GetProviders).with_key("QmContent"),
    )
    .await
    .unwrap();
    let reply = conn.receive_message(&ProtobufCodec).await.unwrap();
    assert_eq!(reply.body.provider_peers.len(), 1);
    assert_eq!(reply.body.provider_peers[0].id, "provider-a");

    conn.send_message(
        &ProtobufCodec,
        &Message::new(MessageKind::GetProviders).with_key("QmMissing"),
    )
    .await
    .unwrap();
    let reply = conn.receive_message(&ProtobufCodec).await.unwrap();
    assert!(reply.body.provider_peers.is_empty());
}

#[tokio::test]
async fn test_signed_records_are_verified() {
    let (node, dispatcher, _peers) = start(loopback_config()).await;
    let keyring = Keyring::new();
    let trusted = SigningKey::from_bytes(&[1u8; 32]);
    let stranger = SigningKey::from_bytes(&[2u8; 32]);
    keyring.insert(trusted.verifying_key());

    let accepted = Arc::new(Mutex::new(Vec::new()));
    dispatcher.register(
        MessageKind::PutValue,
        Arc::new(PutValueHandler {
            verifier: Arc::new(keyring),
            accepted: Arc::clone(&accepted),
        }),
    );

    let mut conn = dial(&node).await;
    let forged = SignedRecord::new_signed("/pk/x", b"evil".to_vec(), &stranger);
    let good = SignedRecord::new_signed("/pk/x", b"good".to_vec(), &trusted).received_now();

    let put = |record| Message::new(MessageKind::PutValue).with_key("/pk/x").with_record(record);
    conn.send_message(&ProtobufCodec, &put(forged)).await.unwrap();
    conn.send_message(&ProtobufCodec, &put(good.clone()))
        .await
        .unwrap();

    let echo = conn.receive_message(&ProtobufCodec).await.unwrap();
    assert_eq!(echo.body.record.as_ref().unwrap().value, b"good");
    assert_eq!(accepted.lock().unwrap().len(), 1);
    assert_eq!(accepted.lock().unwrap()[0].author, good.author);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let server_config = NetworkConfig {
        max_frame_size: 64,
        ..loopback_config()
    };
    let (node, _dispatcher, peers) = start(server_config).await;

    let mut conn = open_and_negotiate("127.0.0.1", node.local_addr().port(), &loopback_config())
        .await
        .unwrap();
    eventually(|| peers.connected_count() == 1).await;

    conn.send_frame(&[0u8; 1024]).await.unwrap();
    eventually(|| peers.connected_count() == 0).await;

    let err = conn.receive_frame().await.unwrap_err();
    assert!(matches!(err, WireError::ConnectionClosed));
}
