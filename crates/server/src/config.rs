use cytos::{BUFFER_MAX_TICKS, DEFAULT_SEND_RATE, DEFAULT_TICK_RATE};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// Heartbeat broadcasts per second. Always lower than the tick rate.
    pub send_rate: u32,
    pub max_peers: usize,
    pub snapshot_history: usize,
    pub peer_timeout_secs: u64,
    /// Outgoing loss applied to heartbeats, for development.
    pub loss_percent: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            send_rate: DEFAULT_SEND_RATE,
            max_peers: 16,
            snapshot_history: BUFFER_MAX_TICKS,
            peer_timeout_secs: 10,
            loss_percent: 0.0,
        }
    }
}

impl ServerConfig {
    /// Simulated ticks between two heartbeat broadcasts.
    pub fn ticks_per_heartbeat(&self) -> u32 {
        (self.tick_rate / self.send_rate.max(1)).max(1)
    }
}
