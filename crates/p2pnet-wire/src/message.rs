//! Application messages carried inside frames.
//!
//! The wire encoding is protobuf, using the field layout of the libp2p
//! Kademlia `Message`/`Record`/`Peer` schema. The core only needs a
//! [`MessageCodec`] to turn frame payloads into [`Message`] values and back;
//! [`ProtobufCodec`] is the default one.

use crate::error::{WireError, WireResult};
use chrono::{DateTime, SecondsFormat, Utc};
use p2pnet_types::peer::{ConnectionType, PeerInfo};
use p2pnet_types::record::SignedRecord;
use prost::Message as _;

/// Message discriminant.
///
/// Values outside the known range are kept verbatim in `Unknown` so that a
/// message can be echoed or forwarded without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PutValue,
    GetValue,
    AddProvider,
    GetProviders,
    FindNode,
    Ping,
    Unknown(i32),
}

impl MessageKind {
    pub fn from_wire(value: i32) -> Self {
        match value {
            0 => Self::PutValue,
            1 => Self::GetValue,
            2 => Self::AddProvider,
            3 => Self::GetProviders,
            4 => Self::FindNode,
            5 => Self::Ping,
            other => Self::Unknown(other),
        }
    }

    pub fn as_wire(self) -> i32 {
        match self {
            Self::PutValue => 0,
            Self::GetValue => 1,
            Self::AddProvider => 2,
            Self::GetProviders => 3,
            Self::FindNode => 4,
            Self::Ping => 5,
            Self::Unknown(other) => other,
        }
    }
}

/// Kind-specific fields. Which ones are meaningful depends on the kind and
/// is up to the handler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageBody {
    pub key: Vec<u8>,
    pub record: Option<SignedRecord>,
    pub closer_peers: Vec<PeerInfo>,
    pub provider_peers: Vec<PeerInfo>,
    pub cluster_level: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub body: MessageBody,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            body: MessageBody::default(),
        }
    }

    pub fn ping() -> Self {
        Self::new(MessageKind::Ping)
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.body.key = key.into();
        self
    }

    pub fn with_record(mut self, record: SignedRecord) -> Self {
        self.body.record = Some(record);
        self
    }
}

/// Converts between frame payloads and messages.
pub trait MessageCodec: Send + Sync + 'static {
    fn encode(&self, message: &Message) -> Vec<u8>;

    /// Fails with [`WireError::Decode`] on malformed input.
    fn decode(&self, bytes: &[u8]) -> WireResult<Message>;
}

/// Protobuf codec for the Kademlia message schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl MessageCodec for ProtobufCodec {
    fn encode(&self, message: &Message) -> Vec<u8> {
        proto::Message::from(message).encode_to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> WireResult<Message> {
        let raw = proto::Message::decode(bytes)?;
        Message::try_from(raw)
    }
}

mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Record {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub author: Vec<u8>,
        #[prost(bytes = "vec", tag = "4")]
        pub signature: Vec<u8>,
        #[prost(string, tag = "5")]
        pub time_received: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Peer {
        #[prost(bytes = "vec", tag = "1")]
        pub id: Vec<u8>,
        #[prost(bytes = "vec", repeated, tag = "2")]
        pub addrs: Vec<Vec<u8>>,
        #[prost(int32, tag = "3")]
        pub connection: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Message {
        #[prost(int32, tag = "1")]
        pub r#type: i32,
        #[prost(int32, tag = "10")]
        pub cluster_level_raw: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub key: Vec<u8>,
        #[prost(message, optional, tag = "3")]
        pub record: Option<Record>,
        #[prost(message, repeated, tag = "8")]
        pub closer_peers: Vec<Peer>,
        #[prost(message, repeated, tag = "9")]
        pub provider_peers: Vec<Peer>,
    }
}

fn utf8(field: &str, bytes: Vec<u8>) -> WireResult<String> {
    String::from_utf8(bytes).map_err(|e| WireError::Decode(format!("{field}: {e}")))
}

impl From<&SignedRecord> for proto::Record {
    fn from(record: &SignedRecord) -> Self {
        Self {
            key: record.key.as_bytes().to_vec(),
            value: record.value.clone(),
            author: record.author.as_bytes().to_vec(),
            signature: record.signature.clone(),
            time_received: record
                .time_received
                .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .unwrap_or_default(),
        }
    }
}

impl TryFrom<proto::Record> for SignedRecord {
    type Error = WireError;

    fn try_from(raw: proto::Record) -> WireResult<Self> {
        let time_received = if raw.time_received.is_empty() {
            None
        } else {
            let parsed = DateTime::parse_from_rfc3339(&raw.time_received)
                .map_err(|e| WireError::Decode(format!("record.time_received: {e}")))?;
            Some(parsed.with_timezone(&Utc))
        };
        Ok(Self {
            key: utf8("record.key", raw.key)?,
            value: raw.value,
            author: utf8("record.author", raw.author)?,
            signature: raw.signature,
            time_received,
        })
    }
}

impl From<&PeerInfo> for proto::Peer {
    fn from(peer: &PeerInfo) -> Self {
        Self {
            id: peer.id.as_bytes().to_vec(),
            addrs: peer.addrs.iter().map(|a| a.as_bytes().to_vec()).collect(),
            connection: peer.connection.as_wire(),
        }
    }
}

impl TryFrom<proto::Peer> for PeerInfo {
    type Error = WireError;

    fn try_from(raw: proto::Peer) -> WireResult<Self> {
        Ok(Self {
            id: utf8("peer.id", raw.id)?,
            addrs: raw
                .addrs
                .into_iter()
                .map(|a| utf8("peer.addrs", a))
                .collect::<WireResult<_>>()?,
            connection: ConnectionType::from_wire(raw.connection),
        })
    }
}

impl From<&Message> for proto::Message {
    fn from(message: &Message) -> Self {
        let body = &message.body;
        Self {
            r#type: message.kind.as_wire(),
            cluster_level_raw: body.cluster_level,
            key: body.key.clone(),
            record: body.record.as_ref().map(proto::Record::from),
            closer_peers: body.closer_peers.iter().map(proto::Peer::from).collect(),
            provider_peers: body.provider_peers.iter().map(proto::Peer::from).collect(),
        }
    }
}

impl TryFrom<proto::Message> for Message {
    type Error = WireError;

    fn try_from(raw: proto::Message) -> WireResult<Self> {
        Ok(Self {
            kind: MessageKind::from_wire(raw.r#type),
            body: MessageBody {
                key: raw.key,
                record: raw.record.map(SignedRecord::try_from).transpose()?,
                closer_peers: raw
                    .closer_peers
                    .into_iter()
                    .map(PeerInfo::try_from)
                    .collect::<WireResult<_>>()?,
                provider_peers: raw
                    .provider_peers
                    .into_iter()
                    .map(PeerInfo::try_from)
                    .collect::<WireResult<_>>()?,
                cluster_level: raw.cluster_level_raw,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use prost::Message as _;

    fn sample_record() -> SignedRecord {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        SignedRecord::new_signed("/pk/alice", b"value".to_vec(), &signing_key).received_now()
    }

    #[test]
    fn test_kind_wire_values() {
        assert_eq!(MessageKind::from_wire(5), MessageKind::Ping);
        assert_eq!(MessageKind::Ping.as_wire(), 5);
        assert_eq!(MessageKind::from_wire(0), MessageKind::PutValue);
        assert_eq!(MessageKind::from_wire(42), MessageKind::Unknown(42));
        assert_eq!(MessageKind::Unknown(42).as_wire(), 42);
        assert_eq!(MessageKind::from_wire(-1), MessageKind::Unknown(-1));
    }

    #[test]
    fn test_full_message_survives_codec() {
        let codec = ProtobufCodec;
        let message = Message {
            kind: MessageKind::GetProviders,
            body: MessageBody {
                key: b"QmContent".to_vec(),
                record: Some(sample_record()),
                closer_peers: vec![PeerInfo::new("peer-a").with_addr("/ip4/10.0.0.1/tcp/4001")],
                provider_peers: vec![PeerInfo {
                    id: "peer-b".to_string(),
                    addrs: vec![],
                    connection: ConnectionType::Connected,
                }],
                cluster_level: 3,
            },
        };
        let decoded = codec.decode(&codec.encode(&message)).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let codec = ProtobufCodec;
        let message = Message::new(MessageKind::Unknown(99)).with_key("k");
        let bytes = codec.encode(&message);
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.kind, MessageKind::Unknown(99));
        assert_eq!(codec.encode(&decoded), bytes);
    }

    #[test]
    fn test_ping_wire_bytes() {
        // field 1 (varint) = 5
        assert_eq!(ProtobufCodec.encode(&Message::ping()), vec![0x08, 0x05]);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = ProtobufCodec.decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_bad_record_time_is_decode_error() {
        let raw = proto::Message {
            r#type: 0,
            record: Some(proto::Record {
                key: b"k".to_vec(),
                time_received: "yesterday".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = ProtobufCodec.decode(&raw.encode_to_vec()).unwrap_err();
        assert!(matches!(err, WireError::Decode(msg) if msg.contains("time_received")));
    }

    #[test]
    fn test_invalid_utf8_peer_id() {
        let raw = proto::Message {
            r#type: 4,
            closer_peers: vec![proto::Peer {
                id: vec![0xc3, 0x28],
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = ProtobufCodec.decode(&raw.encode_to_vec()).unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
    }
}
