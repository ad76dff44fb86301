use cytos::{DEFAULT_SEND_RATE, DEFAULT_TICK_RATE};

use crate::net::prediction::PREDICTION_ERROR_TOLERANCE;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Player name offered at registration; duplicates are rejected.
    pub name: String,
    /// Assumed rates until the Welcome message overrides them.
    pub tick_rate: u32,
    pub send_rate: u32,
    pub ping_interval_secs: f32,
    pub connection_timeout_secs: u64,
    /// Squared positional tolerance before a rewind is triggered.
    pub prediction_tolerance: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "microbe".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            send_rate: DEFAULT_SEND_RATE,
            ping_interval_secs: 0.25,
            connection_timeout_secs: 10,
            prediction_tolerance: PREDICTION_ERROR_TOLERANCE,
        }
    }
}
