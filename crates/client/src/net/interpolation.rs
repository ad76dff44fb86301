//! Smoothing of remote entity motion between heartbeats.
//!
//! Remote entities only change on snapshot arrival, which happens at the
//! send rate, several times slower than the local tick rate. The
//! interpolator blends each entity from its previous snapshot to its latest
//! over one send interval, so remote motion stays continuous on screen.
//! The locally predicted entity never goes through here.

use std::collections::HashMap;

use glam::Quat;

use cytos::{EntityId, StateSnapshot, Tick, tick_delta};

#[derive(Debug)]
struct RemoteTrack {
    previous: StateSnapshot,
    latest: StateSnapshot,
    latest_tick: Tick,
    /// Blend progress from previous to latest, in [0, 1].
    progress: f32,
}

#[derive(Debug)]
pub struct Interpolator {
    tracks: HashMap<EntityId, RemoteTrack>,
    send_interval_seconds: f32,
}

impl Interpolator {
    pub fn new(send_rate: u32) -> Self {
        Self {
            tracks: HashMap::new(),
            send_interval_seconds: 1.0 / send_rate.max(1) as f32,
        }
    }

    pub fn set_send_rate(&mut self, send_rate: u32) {
        self.send_interval_seconds = 1.0 / send_rate.max(1) as f32;
    }

    /// Feeds one authoritative snapshot. The track restarts its blend from
    /// the currently displayed state, so a new snapshot never causes a pop.
    pub fn push(&mut self, id: EntityId, tick: Tick, snapshot: StateSnapshot) {
        match self.tracks.get_mut(&id) {
            Some(track) => {
                if tick_delta(track.latest_tick, tick) <= 0 {
                    // Out-of-order or duplicate heartbeat; newest wins.
                    return;
                }
                track.previous = sample_track(track);
                track.latest = snapshot;
                track.latest_tick = tick;
                track.progress = 0.0;
            }
            None => {
                self.tracks.insert(
                    id,
                    RemoteTrack {
                        previous: snapshot,
                        latest: snapshot,
                        latest_tick: tick,
                        progress: 1.0,
                    },
                );
            }
        }
    }

    /// Advances every blend by one render frame.
    pub fn update(&mut self, delta_seconds: f32) {
        let step = delta_seconds / self.send_interval_seconds;
        for track in self.tracks.values_mut() {
            track.progress = (track.progress + step).min(1.0);
        }
    }

    /// Displayed state for one remote entity.
    pub fn sample(&self, id: EntityId) -> Option<StateSnapshot> {
        self.tracks.get(&id).map(sample_track)
    }

    pub fn remove(&mut self, id: EntityId) {
        self.tracks.remove(&id);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

fn sample_track(track: &RemoteTrack) -> StateSnapshot {
    let t = track.progress;
    StateSnapshot {
        position: track.previous.position.lerp(track.latest.position, t),
        rotation: slerp_shortest(track.previous.rotation, track.latest.rotation, t),
        velocity: track.latest.velocity,
    }
}

/// Slerp along the shorter arc; antipodal quaternion pairs would otherwise
/// spin the long way round.
fn slerp_shortest(from: Quat, to: Quat, t: f32) -> Quat {
    if from.dot(to) < 0.0 {
        from.slerp(-to, t)
    } else {
        from.slerp(to, t)
    }
}
