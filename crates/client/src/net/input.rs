//! Local input sampling and redundant batching.

use cytos::{BUFFER_MAX_TICKS, InputBatch, InputVars, Tick, TickRing};

/// Ring buffer of sampled inputs plus the bookkeeping for the every-other-
/// tick redundant send.
///
/// Each batch re-covers everything from the last server-acknowledged input
/// tick to the present; with a batch leaving every second tick, every input
/// is on the wire at least twice. That redundancy is the only loss
/// mitigation; there is no per-packet ack or retransmit on this path.
#[derive(Debug)]
pub struct InputSampler {
    ring: TickRing<InputVars>,
    acked_tick: Tick,
    last_sampled: Option<InputVars>,
    window_warned: bool,
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSampler {
    pub fn new() -> Self {
        Self {
            ring: TickRing::default(),
            acked_tick: 0,
            last_sampled: None,
            window_warned: false,
        }
    }

    /// Stores the input sampled for one local tick.
    pub fn record(&mut self, tick: Tick, input: InputVars) {
        if self.last_sampled != Some(input) {
            log::trace!("input changed at tick {}", tick);
            self.last_sampled = Some(input);
        }
        self.ring.insert(tick, input);
    }

    pub fn ring(&self) -> &TickRing<InputVars> {
        &self.ring
    }

    /// Latest input tick the server has confirmed, from the heartbeat.
    pub fn set_acked(&mut self, tick: Tick) {
        if tick > self.acked_tick {
            self.acked_tick = tick;
            self.window_warned = false;
        }
    }

    pub fn acked_tick(&self) -> Tick {
        self.acked_tick
    }

    /// Builds the unacknowledged run `(acked, current]`. When that overlap
    /// has outgrown the ring, the evicted prefix is permanently
    /// unrecoverable (the server will hold its last input) and the batch
    /// starts at the oldest tick still buffered.
    pub fn build_batch(&mut self, current_tick: Tick) -> Option<InputBatch> {
        let window_floor =
            current_tick.saturating_sub(self.ring.capacity() as Tick - 1);
        let mut start = self.acked_tick.saturating_add(1).max(window_floor);

        if start == window_floor && self.acked_tick.saturating_add(1) < window_floor {
            if !self.window_warned {
                log::warn!(
                    "unacked input window exceeds {} ticks; older inputs lost to the server",
                    BUFFER_MAX_TICKS
                );
                self.window_warned = true;
            }
        }

        // Skip leading slots that were never sampled (fresh session).
        while start <= current_tick && self.ring.try_get(start).is_none() {
            start += 1;
        }

        let mut inputs = Vec::new();
        let mut tick = start;
        while tick <= current_tick {
            match self.ring.try_get(tick) {
                Some(input) => inputs.push(*input),
                None => break,
            }
            tick += 1;
        }

        if inputs.is_empty() {
            return None;
        }
        Some(InputBatch {
            start_tick: start,
            inputs,
        })
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.acked_tick = 0;
        self.last_sampled = None;
        self.window_warned = false;
    }
}
