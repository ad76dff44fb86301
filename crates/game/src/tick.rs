use std::num::Wrapping;

/// One discrete simulation step.
pub type Tick = u32;

/// Capacity of every tick-indexed history buffer. Slots silently overwrite
/// once a tick is more than this many steps in the past.
pub const BUFFER_MAX_TICKS: usize = 128;

/// Tick-indexed circular buffer.
///
/// Each slot remembers the tick it was written for, so a lookup for an
/// evicted or never-written tick yields `None` instead of a stale value.
#[derive(Debug, Clone)]
pub struct TickRing<T> {
    slots: Vec<Option<(Tick, T)>>,
    capacity: usize,
}

impl<T> Default for TickRing<T> {
    fn default() -> Self {
        Self::new(BUFFER_MAX_TICKS)
    }
}

impl<T> TickRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index(&self, tick: Tick) -> usize {
        tick as usize % self.capacity
    }

    pub fn insert(&mut self, tick: Tick, value: T) {
        let index = self.index(tick);
        self.slots[index] = Some((tick, value));
    }

    pub fn try_get(&self, tick: Tick) -> Option<&T> {
        self.slots[self.index(tick)]
            .as_ref()
            .filter(|(t, _)| *t == tick)
            .map(|(_, v)| v)
    }

    pub fn try_get_mut(&mut self, tick: Tick) -> Option<&mut T> {
        let index = self.index(tick);
        self.slots[index]
            .as_mut()
            .filter(|(t, _)| *t == tick)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, tick: Tick) -> bool {
        self.try_get(tick).is_some()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest tick currently held, if any.
    pub fn latest_tick(&self) -> Option<Tick> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|(t, _)| *t))
            .max()
    }
}

/// Signed distance from `from` to `to` in ticks, tolerant of counter wrap.
pub fn tick_delta(from: Tick, to: Tick) -> i64 {
    (Wrapping(to) - Wrapping(from)).0 as i32 as i64
}
