use std::collections::VecDeque;

use crate::tick::Tick;

/// Discrete physics-rate multipliers, fastest catch-up first. Soft clock
/// correction never jumps ticks; it only nudges the step rate through this
/// ladder.
pub const TICK_RATE_MULTIPLIERS: [f32; 5] = [1.125, 1.0625, 1.0, 0.9375, 0.875];

/// Extra ticks added on top of the latency allowance during a hard resync.
pub const RESYNC_MARGIN_TICKS: Tick = 2;

const MAX_FRAME_DELTA: f32 = 0.25;

/// Local tick counter with adaptive rate scaling.
///
/// Keeps a moving average of the tick lead reported by the server and maps
/// it to one of five discrete rate multipliers, so the client converges on
/// the target lead band without visible stutter. A hard resync
/// ([`TickClock::adjust_client_tick`]) is reserved for the cases where the
/// soft path cannot keep up.
#[derive(Debug)]
pub struct TickClock {
    tick: Tick,
    dt: f32,
    multiplier: f32,
    accumulator: f32,
    lead_window: VecDeque<i64>,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            dt: 1.0 / tick_rate as f32,
            multiplier: 1.0,
            accumulator: 0.0,
            lead_window: VecDeque::new(),
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    /// Base step duration scaled by the current multiplier. A multiplier
    /// above 1.0 shortens the step, running the simulation faster.
    pub fn effective_dt(&self) -> f32 {
        self.dt / self.multiplier
    }

    pub fn base_dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(MAX_FRAME_DELTA);
    }

    pub fn consume_tick(&mut self) -> bool {
        let dt = self.effective_dt();
        if self.accumulator >= dt {
            self.accumulator -= dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.effective_dt()
    }

    pub fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Soft correction: folds one tick-lead sample into a `send_rate`-sized
    /// moving window and picks the multiplier for the window average.
    pub fn adjust_tick_rate(&mut self, tick_lead: i64, send_rate: u32) -> f32 {
        let window = send_rate.max(1) as usize;
        self.lead_window.push_back(tick_lead);
        while self.lead_window.len() > window {
            self.lead_window.pop_front();
        }

        let average =
            self.lead_window.iter().sum::<i64>() as f32 / self.lead_window.len() as f32;

        self.multiplier = if average <= -6.0 {
            TICK_RATE_MULTIPLIERS[0]
        } else if average < 0.0 {
            TICK_RATE_MULTIPLIERS[1]
        } else if average < 2.0 {
            TICK_RATE_MULTIPLIERS[2]
        } else if average < 8.0 {
            TICK_RATE_MULTIPLIERS[3]
        } else {
            TICK_RATE_MULTIPLIERS[4]
        };
        self.multiplier
    }

    /// Hard resynchronization, used at registration and whenever the server
    /// tick has caught up with the local counter. Places the local tick far
    /// enough ahead that inputs sent now arrive before the server needs
    /// them.
    pub fn adjust_client_tick(&mut self, server_tick: Tick, rtt_seconds: f32, frame_delta: f32) -> bool {
        if server_tick < self.tick {
            return false;
        }

        let latency_ticks = (1.5 * rtt_seconds / frame_delta.max(f32::EPSILON)).ceil() as Tick;
        self.tick = server_tick + latency_ticks + RESYNC_MARGIN_TICKS;
        self.lead_window.clear();
        self.multiplier = 1.0;
        log::debug!(
            "hard tick resync: server {} -> local {} ({} latency ticks)",
            server_tick,
            self.tick,
            latency_ticks
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_band_lead_is_idempotent() {
        let mut clock = TickClock::new(60);

        for _ in 0..100 {
            let m = clock.adjust_tick_rate(1, 20);
            assert_eq!(m, 1.0);
        }
        assert_eq!(clock.multiplier(), 1.0);
    }

    #[test]
    fn multiplier_ladder_boundaries() {
        // A window of one sample makes the average equal the sample.
        let mut clock = TickClock::new(60);
        assert_eq!(clock.adjust_tick_rate(-6, 1), 1.125);
        assert_eq!(clock.adjust_tick_rate(-1, 1), 1.0625);
        assert_eq!(clock.adjust_tick_rate(0, 1), 1.0);
        assert_eq!(clock.adjust_tick_rate(2, 1), 0.9375);
        assert_eq!(clock.adjust_tick_rate(8, 1), 0.875);
    }

    #[test]
    fn window_smooths_spikes() {
        let mut clock = TickClock::new(60);
        for _ in 0..19 {
            clock.adjust_tick_rate(0, 20);
        }
        // One spike inside a 20-sample window is not enough to leave the
        // normal band.
        assert_eq!(clock.adjust_tick_rate(20, 20), 1.0);
    }

    #[test]
    fn faster_multiplier_consumes_sooner() {
        let mut clock = TickClock::new(60);
        clock.adjust_tick_rate(-10, 1);
        assert!(clock.effective_dt() < clock.base_dt());

        clock.accumulate(clock.base_dt());
        assert!(clock.consume_tick());
    }

    #[test]
    fn hard_resync_only_when_behind() {
        let mut clock = TickClock::new(60);
        assert!(clock.adjust_client_tick(100, 0.1, 1.0 / 60.0));
        // ceil(1.5 * 0.1 * 60) = 9 latency ticks + margin.
        assert_eq!(clock.tick(), 100 + 9 + RESYNC_MARGIN_TICKS);

        assert!(!clock.adjust_client_tick(50, 0.1, 1.0 / 60.0));
        assert_eq!(clock.tick(), 100 + 9 + RESYNC_MARGIN_TICKS);
    }

    #[test]
    fn server_tick_equal_to_local_still_resyncs() {
        let mut clock = TickClock::new(60);
        let local = clock.tick();
        assert!(clock.adjust_client_tick(local, 0.0, 1.0 / 60.0));
        assert_eq!(clock.tick(), local + RESYNC_MARGIN_TICKS);
    }
}
