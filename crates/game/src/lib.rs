pub mod clock;
pub mod input;
pub mod net;
pub mod sim;
pub mod snapshot;
pub mod tick;

pub use clock::{RESYNC_MARGIN_TICKS, TICK_RATE_MULTIPLIERS, TickClock};
pub use input::{INPUT_VARS_WIRE_SIZE, InputBatch, InputFlags, InputVars, pack_movement, unpack_movement};
pub use net::{
    DEFAULT_PORT, DEFAULT_SEND_RATE, DEFAULT_TICK_RATE, Datagram, Heartbeat, MAX_PACKET_SIZE,
    Message, NETWORK_PING_TIMEOUT_MS, NetworkEndpoint, NetworkStats, Packet, PacketError,
    PacketHeader, PacketLossSimulation, PeerSession, PeerStatus, PingTracker, RawPacket,
    RegistrationError, ReliableChannel, SessionManager, WireError, WorldStateMap,
    decode_input_batch, encode_input_batch,
};
pub use sim::{Agent, Chunk, Microbe, spawn_entity, step_movement};
pub use snapshot::{EntityId, EntityKind, NetworkedEntity, StateSnapshot, World};
pub use tick::{BUFFER_MAX_TICKS, Tick, TickRing, tick_delta};
