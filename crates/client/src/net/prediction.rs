//! Client-side prediction and server-authoritative reconciliation for the
//! locally controlled entity.

use cytos::{InputVars, StateSnapshot, Tick, TickRing, step_movement, tick_delta};

/// Squared positional error below which a delayed authoritative snapshot is
/// accepted as matching the prediction.
pub const PREDICTION_ERROR_TOLERANCE: f32 = 0.0004;

/// What a single authoritative snapshot did to the predicted timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Prediction was within tolerance; snapshot discarded.
    Accepted,
    /// Prediction diverged: state was snapped and later ticks resimulated.
    Replayed { corrected_tick: Tick, replayed: u32 },
    /// The ring slot for the snapshot's tick was already evicted; nothing
    /// to compare against, correction skipped.
    Skipped,
}

/// Rewind-and-replay reconciler.
///
/// Runs the {Predicting} -> {Correcting} -> {Replaying} -> {Predicting}
/// cycle: every local tick applies freshly sampled input optimistically and
/// records the result; every authoritative snapshot either confirms the
/// recorded past or rewrites it and deterministically resimulates the ticks
/// since.
#[derive(Debug)]
pub struct Reconciler {
    current: StateSnapshot,
    history: TickRing<StateSnapshot>,
    first_predicted: Option<Tick>,
    tolerance_squared: f32,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::with_tolerance(PREDICTION_ERROR_TOLERANCE)
    }

    pub fn with_tolerance(tolerance_squared: f32) -> Self {
        Self {
            current: StateSnapshot::default(),
            history: TickRing::default(),
            first_predicted: None,
            tolerance_squared,
        }
    }

    pub fn current(&self) -> StateSnapshot {
        self.current
    }

    pub fn recorded(&self, tick: Tick) -> Option<&StateSnapshot> {
        self.history.try_get(tick)
    }

    /// Adopts an authoritative starting state (possession, respawn).
    pub fn reset_to(&mut self, state: StateSnapshot) {
        self.current = state;
        self.history.clear();
        self.first_predicted = None;
    }

    /// Predicting: advances the local entity by one tick of optimistic
    /// execution and records the result for later comparison.
    pub fn predict(&mut self, tick: Tick, input: &InputVars, dt: f32) -> StateSnapshot {
        self.current = step_movement(&self.current, input, dt);
        self.history.insert(tick, self.current);
        self.first_predicted.get_or_insert(tick);
        self.current
    }

    /// Correcting/Replaying: compares the authoritative state for `tick`
    /// (always in the past) against the recorded prediction. Within
    /// tolerance the snapshot is discarded; beyond it the slot is snapped
    /// to the server state and every tick in `(tick, current_tick)` is
    /// resimulated from the buffered inputs, overwriting the ring as it
    /// goes. Resimulation never touches the corrected tick itself and never
    /// advances past the current tick.
    pub fn reconcile(
        &mut self,
        tick: Tick,
        authoritative: &StateSnapshot,
        current_tick: Tick,
        inputs: &TickRing<InputVars>,
        dt: f32,
    ) -> ReconcileOutcome {
        let Some(recorded) = self.history.try_get(tick) else {
            // A tick we once predicted but lost to the ring is a real (if
            // tolerable) desync; a tick from before prediction began is just
            // the join transient.
            match self.first_predicted {
                Some(first) if tick_delta(first, tick) >= 0 => log::warn!(
                    "authoritative tick {} evicted from prediction history; \
                     correction skipped (stale by {} ticks)",
                    tick,
                    tick_delta(tick, current_tick)
                ),
                _ => log::debug!("no prediction recorded for tick {} yet", tick),
            }
            return ReconcileOutcome::Skipped;
        };

        let error = recorded.position_error_squared(authoritative);
        if error <= self.tolerance_squared {
            return ReconcileOutcome::Accepted;
        }

        log::debug!(
            "prediction diverged at tick {} (error² {:.6}), replaying",
            tick,
            error
        );

        // Snap, no smoothing: the corrected tick takes the server state
        // verbatim.
        self.history.insert(tick, *authoritative);

        let mut state = *authoritative;
        let mut replayed = 0u32;
        let mut next = tick.wrapping_add(1);
        while next != current_tick {
            let input = inputs.try_get(next).copied().unwrap_or_default();
            state = step_movement(&state, &input, dt);
            self.history.insert(next, state);
            replayed += 1;
            next = next.wrapping_add(1);
        }

        self.current = state;
        ReconcileOutcome::Replayed {
            corrected_tick: tick,
            replayed,
        }
    }
}
