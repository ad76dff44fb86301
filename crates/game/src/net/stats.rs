/// Outgoing-drop simulation for development and tests. Applied to the
/// unreliable plane only, mirroring where real loss hurts.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn with_loss(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() * 100.0 < self.loss_percent
    }
}

/// Bandwidth and latency accounting for one endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

pub fn rand_percent() -> f32 {
    rand_u64() as f32 / u64::MAX as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::Instant;

    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_simulation_never_drops() {
        let sim = PacketLossSimulation::default();
        for _ in 0..100 {
            assert!(!sim.should_drop());
        }
    }

    #[test]
    fn full_loss_always_drops() {
        let sim = PacketLossSimulation::with_loss(100.0);
        for _ in 0..100 {
            assert!(sim.should_drop());
        }
    }
}
