//! p2pnet wire layer: multistream negotiation and varint message framing.
//!
//! Two peers exchange a protocol line, require it to match exactly, and then
//! talk in length-prefixed frames whose payloads are protobuf messages.
//!
//! ## Architecture
//!
//! - **varint / frame**: LEB128 length prefixes and bounded frame I/O
//! - **handshake**: the multistream negotiator and sub-protocol upgrade
//! - **message**: the message model and its protobuf codec
//! - **connection**: a negotiated connection, plus outbound dialing
//! - **dispatch**: routes messages to handlers by kind (`Ping` echoes)
//! - **node**: inbound listener that serves every accepted connection
//! - **store**: peer and provider directories

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod node;
pub mod retry;
pub mod store;
pub mod varint;

pub use connection::{open_and_negotiate, open_and_upgrade, CloseHandle, Connection};
pub use dispatch::{Dispatched, Dispatcher, MessageHandler, PingHandler};
pub use error::{WireError, WireResult};
pub use frame::{receive_frame, send_frame, send_keep_alive, FrameOptions};
pub use handshake::{NegotiationState, Negotiator, ProtocolId, Role};
pub use message::{Message, MessageBody, MessageCodec, MessageKind, ProtobufCodec};
pub use node::Node;
pub use store::{MemoryPeerStore, MemoryProviderStore, PeerStore, ProviderStore};
