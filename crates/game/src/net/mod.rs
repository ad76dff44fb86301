mod protocol;
mod reliable;
mod session;
mod stats;
mod transport;
pub mod wire;

pub use protocol::{
    DEFAULT_PORT, DEFAULT_SEND_RATE, DEFAULT_TICK_RATE, MAX_PACKET_SIZE, Message,
    NETWORK_PING_TIMEOUT_MS, Packet, PacketError, PacketHeader, PROTOCOL_MAGIC, PROTOCOL_VERSION,
    RAW_PACKET_SIGNATURE, RawPacket,
};
pub use reliable::ReliableChannel;
pub use session::{PeerSession, PeerStatus, RegistrationError, SessionManager};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transport::{Datagram, NetworkEndpoint, PingTracker};
pub use wire::{Heartbeat, WireError, WorldStateMap, decode_input_batch, encode_input_batch};
