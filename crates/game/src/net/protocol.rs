use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::net::wire::{Reader, WireError, put_u16, put_u64};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x4359_544F; // "CYTO"
pub const DEFAULT_PORT: u16 = 27805;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_SEND_RATE: u32 = 20;

/// First byte of a packet that bypasses the message envelope entirely.
pub const RAW_PACKET_SIGNATURE: u8 = 0xC9;
const RAW_FLAG_PING: u8 = 0;
const RAW_FLAG_PONG: u8 = 1;

pub const RAW_PING_SIZE: usize = 4;
pub const RAW_PONG_SIZE: usize = 12;

/// Milliseconds after which an unanswered ping counts as lost. Lost pings
/// are never retried; the next periodic ping supersedes them.
pub const NETWORK_PING_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Every message the endpoints exchange, dispatched by an explicit match;
/// there is no reflective routing anywhere.
///
/// `InputBatch` and `Heartbeat` carry their fixed-layout payloads from
/// [`crate::net::wire`] verbatim.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    Register { name: String },
    Welcome {
        peer_id: u32,
        server_tick: u32,
        tick_rate: u32,
        send_rate: u32,
        entity_count: u32,
    },
    Denied { reason: String },
    JoinReady,
    Spawn { id: u32, kind: u8, payload: Vec<u8> },
    SpawnRequest { id: u32 },
    Despawn { id: u32 },
    /// Tells the joining peer which entity it predicts and steers.
    Possess { id: u32 },
    EntityVars { id: u32, payload: Vec<u8> },
    Kick { reason: String },
    Leave,
    InputBatch { payload: Vec<u8> },
    Heartbeat { payload: Vec<u8> },
    ReliableAck { sequence: u32 },
}

impl Message {
    /// Control messages ride the reliable channel; the high-frequency
    /// traffic and acks stay unreliable.
    pub fn is_reliable(&self) -> bool {
        !matches!(
            self,
            Message::InputBatch { .. }
                | Message::Heartbeat { .. }
                | Message::ReliableAck { .. }
                | Message::Leave
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::Welcome { .. } => "welcome",
            Message::Denied { .. } => "denied",
            Message::JoinReady => "join-ready",
            Message::Spawn { .. } => "spawn",
            Message::SpawnRequest { .. } => "spawn-request",
            Message::Despawn { .. } => "despawn",
            Message::Possess { .. } => "possess",
            Message::EntityVars { .. } => "entity-vars",
            Message::Kick { .. } => "kick",
            Message::Leave => "leave",
            Message::InputBatch { .. } => "input-batch",
            Message::Heartbeat { .. } => "heartbeat",
            Message::ReliableAck { .. } => "reliable-ack",
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub message: Message,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, message: Message) -> Self {
        Self { header, message }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}

/// Ping/pong frames that skip the envelope: a one-byte signature, a
/// direction flag, the ping id, and (pong only) the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPacket {
    Ping { id: u16 },
    Pong { id: u16, server_clock_ms: u64 },
}

impl RawPacket {
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            RawPacket::Ping { id } => {
                let mut out = Vec::with_capacity(RAW_PING_SIZE);
                out.push(RAW_PACKET_SIGNATURE);
                out.push(RAW_FLAG_PING);
                put_u16(&mut out, id);
                out
            }
            RawPacket::Pong {
                id,
                server_clock_ms,
            } => {
                let mut out = Vec::with_capacity(RAW_PONG_SIZE);
                out.push(RAW_PACKET_SIGNATURE);
                out.push(RAW_FLAG_PONG);
                put_u16(&mut out, id);
                put_u64(&mut out, server_clock_ms);
                out
            }
        }
    }

    /// Returns `None` when the datagram is not a raw frame; envelope parsing
    /// should be attempted instead.
    pub fn decode(data: &[u8]) -> Option<Result<Self, WireError>> {
        if data.first() != Some(&RAW_PACKET_SIGNATURE) {
            return None;
        }
        if data.len() != RAW_PING_SIZE && data.len() != RAW_PONG_SIZE {
            return None;
        }

        let mut r = Reader::new(&data[1..]);
        Some(Self::decode_body(&mut r))
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, WireError> {
        match r.read_u8()? {
            RAW_FLAG_PING => Ok(RawPacket::Ping { id: r.read_u16()? }),
            RAW_FLAG_PONG => Ok(RawPacket::Pong {
                id: r.read_u16()?,
                server_clock_ms: r.read_u64()?,
            }),
            _ => Err(WireError::Malformed("raw packet flag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_roundtrip() {
        let packet = Packet::new(
            PacketHeader::new(5),
            Message::Register {
                name: "amoeba".into(),
            },
        );

        let data = packet.serialize().unwrap();
        let decoded = Packet::deserialize(&data).unwrap();

        assert_eq!(decoded.header, packet.header);
        match decoded.message {
            Message::Register { name } => assert_eq!(name, "amoeba"),
            other => panic!("wrong message: {}", other.name()),
        }
    }

    #[test]
    fn reliability_split() {
        assert!(Message::Register { name: String::new() }.is_reliable());
        assert!(Message::Despawn { id: 1 }.is_reliable());
        assert!(!Message::Heartbeat { payload: vec![] }.is_reliable());
        assert!(!Message::InputBatch { payload: vec![] }.is_reliable());
        assert!(!Message::ReliableAck { sequence: 0 }.is_reliable());
    }

    #[test]
    fn raw_frames() {
        let ping = RawPacket::Ping { id: 7 };
        let data = ping.encode();
        assert_eq!(data.len(), RAW_PING_SIZE);
        assert_eq!(data[0], RAW_PACKET_SIGNATURE);
        assert_eq!(RawPacket::decode(&data).unwrap().unwrap(), ping);

        let pong = RawPacket::Pong {
            id: 7,
            server_clock_ms: 123_456,
        };
        let data = pong.encode();
        assert_eq!(data.len(), RAW_PONG_SIZE);
        assert_eq!(RawPacket::decode(&data).unwrap().unwrap(), pong);

        // Not a raw frame: falls through to envelope parsing.
        assert!(RawPacket::decode(&[1, 2, 3, 4]).is_none());
    }
}
