//! Message dispatch.
//!
//! A [`Dispatcher`] reads one frame at a time from a negotiated
//! [`Connection`], decodes it and hands the message to the handler
//! registered for its kind. `Ping` is answered out of the box by echoing the
//! message back unchanged; kinds without a handler are accepted and dropped.

use crate::connection::Connection;
use crate::error::{WireError, WireResult};
use crate::message::{Message, MessageCodec, MessageKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

/// Reacts to one decoded message on a connection.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, conn: &mut Connection, message: Message) -> WireResult<()>;
}

/// Echoes the message back verbatim (same kind, same body).
pub struct PingHandler {
    codec: Arc<dyn MessageCodec>,
}

impl PingHandler {
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, conn: &mut Connection, message: Message) -> WireResult<()> {
        conn.send_message(&*self.codec, &message).await?;
        trace!(conn = %conn.id(), "ping echoed");
        Ok(())
    }
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A registered handler processed the message.
    Handled(MessageKind),
    /// No handler for this kind; the message was dropped.
    Ignored(MessageKind),
    /// A zero-length frame (keep-alive); nothing was decoded.
    Empty,
}

/// Routes incoming messages to handlers by kind.
pub struct Dispatcher {
    codec: Arc<dyn MessageCodec>,
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl Dispatcher {
    /// Create a dispatcher with the built-in [`PingHandler`] registered.
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        let mut handlers: HashMap<MessageKind, Arc<dyn MessageHandler>> = HashMap::new();
        handlers.insert(
            MessageKind::Ping,
            Arc::new(PingHandler::new(Arc::clone(&codec))),
        );
        Self {
            codec,
            handlers: RwLock::new(handlers),
        }
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    /// Install `handler` for `kind`, returning the one it replaces.
    pub fn register(
        &self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(kind, handler)
    }

    pub fn unregister(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(&kind)
    }

    pub fn has_handler(&self, kind: MessageKind) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(&kind)
    }

    fn handler_for(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).cloned()
    }

    /// Receive one frame, decode it and run the matching handler.
    ///
    /// A payload that fails to decode is returned as [`WireError::Decode`];
    /// the frame has been consumed in full, so the connection stays usable.
    pub async fn handle_incoming(&self, conn: &mut Connection) -> WireResult<Dispatched> {
        let payload = conn.receive_frame().await?;
        if payload.is_empty() {
            trace!(conn = %conn.id(), "keep-alive frame");
            return Ok(Dispatched::Empty);
        }

        let message = self.codec.decode(&payload)?;
        let kind = message.kind;
        match self.handler_for(kind) {
            Some(handler) => {
                handler.handle(conn, message).await?;
                Ok(Dispatched::Handled(kind))
            }
            None => {
                debug!(conn = %conn.id(), kind = ?kind, "no handler registered, message dropped");
                Ok(Dispatched::Ignored(kind))
            }
        }
    }

    /// Dispatch messages until the connection ends.
    ///
    /// The peer hanging up between frames (or a [`CloseHandle`] firing) is a
    /// normal end and returns `Ok(())`. Undecodable messages are logged and
    /// skipped unless `close_on_decode_error` is set.
    ///
    /// [`CloseHandle`]: crate::connection::CloseHandle
    pub async fn serve(&self, conn: &mut Connection, close_on_decode_error: bool) -> WireResult<()> {
        loop {
            match self.handle_incoming(conn).await {
                Ok(_) => {}
                Err(WireError::ConnectionClosed) => {
                    debug!(conn = %conn.id(), "peer closed connection");
                    return Ok(());
                }
                Err(WireError::Decode(reason)) if !close_on_decode_error => {
                    warn!(conn = %conn.id(), %reason, "skipping undecodable message");
                }
                Err(e) => {
                    warn!(conn = %conn.id(), error = %e, "connection loop ended");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameOptions;
    use crate::handshake::{ProtocolId, Role};
    use crate::message::ProtobufCodec;
    use p2pnet_types::peer::PeerInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::duplex;

    fn opts() -> FrameOptions {
        FrameOptions {
            io_timeout: Duration::from_secs(2),
            ..FrameOptions::default()
        }
    }

    async fn negotiated_pair() -> (Connection, Connection) {
        let (a, b) = duplex(8192);
        let mut client = Connection::new(a, None, opts());
        let mut server = Connection::new(b, None, opts());
        let (ra, rb) = tokio::join!(
            client.negotiate(Role::Initiator, ProtocolId::multistream()),
            server.negotiate(Role::Responder, ProtocolId::multistream())
        );
        ra.unwrap();
        rb.unwrap();
        (client, server)
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ProtobufCodec))
    }

    #[tokio::test]
    async fn test_ping_is_echoed_verbatim() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = dispatcher();
        let ping = Message::ping()
            .with_key("nonce-42")
            .with_record(p2pnet_types::record::SignedRecord {
                key: "k".to_string(),
                value: b"v".to_vec(),
                author: "me".to_string(),
                signature: vec![1, 2, 3],
                time_received: None,
            });

        client.send_message(&ProtobufCodec, &ping).await.unwrap();
        let outcome = dispatcher.handle_incoming(&mut server).await.unwrap();
        assert_eq!(outcome, Dispatched::Handled(MessageKind::Ping));

        let echo = client.receive_message(&ProtobufCodec).await.unwrap();
        assert_eq!(echo, ping);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_ignored() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = dispatcher();

        let find = Message::new(MessageKind::FindNode).with_key("target");
        client.send_message(&ProtobufCodec, &find).await.unwrap();
        client
            .send_message(&ProtobufCodec, &Message::new(MessageKind::Unknown(77)))
            .await
            .unwrap();
        client.send_message(&ProtobufCodec, &Message::ping()).await.unwrap();

        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Ignored(MessageKind::FindNode)
        );
        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Ignored(MessageKind::Unknown(77))
        );
        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Handled(MessageKind::Ping)
        );
        assert_eq!(
            client.receive_message(&ProtobufCodec).await.unwrap(),
            Message::ping()
        );
    }

    #[tokio::test]
    async fn test_decode_error_is_not_fatal() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = dispatcher();

        client.send_frame(&[0x0a, 0x05, 0x01]).await.unwrap();
        client.send_message(&ProtobufCodec, &Message::ping()).await.unwrap();

        let err = dispatcher.handle_incoming(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Handled(MessageKind::Ping)
        );
    }

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, conn: &mut Connection, message: Message) -> WireResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let mut reply = Message::new(MessageKind::FindNode).with_key(message.body.key);
            reply.body.closer_peers = vec![PeerInfo::new("closer")];
            conn.send_message(&ProtobufCodec, &reply).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registered_handler_runs() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = dispatcher();
        let counting = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        assert!(!dispatcher.has_handler(MessageKind::FindNode));
        assert!(dispatcher
            .register(MessageKind::FindNode, counting.clone())
            .is_none());
        assert!(dispatcher.has_handler(MessageKind::FindNode));

        client
            .send_message(&ProtobufCodec, &Message::new(MessageKind::FindNode).with_key("t"))
            .await
            .unwrap();
        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Handled(MessageKind::FindNode)
        );
        let reply = client.receive_message(&ProtobufCodec).await.unwrap();
        assert_eq!(reply.body.closer_peers[0].id, "closer");
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);

        assert!(dispatcher.unregister(MessageKind::FindNode).is_some());
        assert!(!dispatcher.has_handler(MessageKind::FindNode));
    }

    #[tokio::test]
    async fn test_ping_handler_can_be_removed() {
        let dispatcher = dispatcher();
        assert!(dispatcher.has_handler(MessageKind::Ping));
        dispatcher.unregister(MessageKind::Ping);
        assert!(!dispatcher.has_handler(MessageKind::Ping));
    }

    #[tokio::test]
    async fn test_serve_until_peer_hangs_up() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = Arc::new(dispatcher());

        let serving = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let result = dispatcher.serve(&mut server, false).await;
                (result, server)
            })
        };

        client.send_frame(&[0xff, 0xff, 0xff]).await.unwrap();
        for _ in 0..3 {
            client.send_message(&ProtobufCodec, &Message::ping()).await.unwrap();
            let echo = client.receive_message(&ProtobufCodec).await.unwrap();
            assert_eq!(echo.kind, MessageKind::Ping);
        }
        client.close().await;
        drop(client);

        let (result, _server) = serving.await.unwrap();
        result.unwrap();
    }

    #[tokio::test]
    async fn test_serve_can_close_on_decode_error() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = dispatcher();

        client.send_frame(&[0xff, 0xff, 0xff]).await.unwrap();
        let err = dispatcher.serve(&mut server, true).await.unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
    }

    #[tokio::test]
    async fn test_empty_frame_is_keep_alive() {
        use tokio::io::AsyncWriteExt;

        let (mut raw, b) = duplex(1024);
        let mut server = Connection::new(b, None, opts());
        let line = crate::frame::encode_frame(ProtocolId::multistream().as_bytes());
        raw.write_all(&line).await.unwrap();
        server
            .negotiate(Role::Responder, ProtocolId::multistream())
            .await
            .unwrap();

        raw.write_all(&crate::frame::encode_frame(&[])).await.unwrap();
        let outcome = dispatcher().handle_incoming(&mut server).await.unwrap();
        assert_eq!(outcome, Dispatched::Empty);
    }

    #[tokio::test]
    async fn test_sent_keep_alive_is_dispatched_as_empty() {
        let (mut client, mut server) = negotiated_pair().await;
        let dispatcher = dispatcher();

        client.send_keep_alive().await.unwrap();
        client.send_message(&ProtobufCodec, &Message::ping()).await.unwrap();

        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Empty
        );
        assert_eq!(
            dispatcher.handle_incoming(&mut server).await.unwrap(),
            Dispatched::Handled(MessageKind::Ping)
        );
        let echo = client.receive_message(&ProtobufCodec).await.unwrap();
        assert_eq!(echo.kind, MessageKind::Ping);
    }
}
