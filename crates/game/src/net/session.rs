use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::input::{InputBatch, InputVars};
use crate::net::reliable::ReliableChannel;
use crate::net::stats::{NetworkStats, PacketLossSimulation};
use crate::snapshot::EntityId;
use crate::tick::Tick;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// Registered but not yet receiving world data.
    Lobby,
    /// Receiving the join-in-progress entity parade.
    Joining,
    /// Fully replicated; included in heartbeat broadcast.
    Active,
    /// Says goodbye; reaped on the next sweep.
    Leaving,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("server is full")]
    ServerFull,
    #[error("name '{0}' is already taken")]
    DuplicateName(String),
}

/// Everything the netcode tracks for one connected peer. Owned by a
/// [`SessionManager`] and lent by reference to the components that need it;
/// nothing here is global state.
#[derive(Debug)]
pub struct PeerSession {
    pub addr: SocketAddr,
    pub peer_id: u32,
    pub name: String,
    pub status: PeerStatus,
    pub entity_id: Option<EntityId>,
    pub reliable: ReliableChannel,
    pub stats: NetworkStats,
    pub loss_sim: PacketLossSimulation,
    /// Entities whose spawn message was sent but whose arrival the join
    /// handshake has not yet confirmed (join-in-progress accounting).
    pub announced_entities: u32,
    inputs: BTreeMap<Tick, InputVars>,
    latest_ack: Option<(Tick, InputVars)>,
    send_sequence: u32,
    last_receive_time: Instant,
}

impl PeerSession {
    pub fn new(addr: SocketAddr, peer_id: u32, name: String) -> Self {
        Self {
            addr,
            peer_id,
            name,
            status: PeerStatus::Lobby,
            entity_id: None,
            reliable: ReliableChannel::new(),
            stats: NetworkStats::default(),
            loss_sim: PacketLossSimulation::default(),
            announced_entities: 0,
            inputs: BTreeMap::new(),
            latest_ack: None,
            send_sequence: 0,
            last_receive_time: Instant::now(),
        }
    }

    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        sequence
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    /// Highest input tick received from this peer, as echoed in heartbeats.
    /// Zero until the first input arrives.
    pub fn acked_input_tick(&self) -> Tick {
        self.latest_ack.map(|(tick, _)| tick).unwrap_or(0)
    }

    pub fn buffered_input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Merges a redundant input batch, skipping everything at or before the
    /// latest acknowledged tick, and advances the acknowledged (tick, input)
    /// pointer to the end of the batch. Duplicate and stale records are the
    /// normal case here, not an anomaly.
    pub fn merge_input_batch(&mut self, batch: &InputBatch) {
        if batch.inputs.is_empty() {
            return;
        }

        let start_offset = match self.latest_ack {
            Some((acked, _)) => (acked + 1).saturating_sub(batch.start_tick) as usize,
            None => 0,
        };

        for (index, input) in batch.inputs.iter().enumerate().skip(start_offset) {
            let tick = batch.start_tick + index as Tick;
            self.inputs.insert(tick, *input);
        }

        let batch_last = batch.end_tick() - 1;
        if self.latest_ack.is_none_or(|(acked, _)| batch_last > acked) {
            self.latest_ack = Some((batch_last, *batch.inputs.last().unwrap()));
        }
    }

    /// Looks up the exact input for one simulated tick; when it never
    /// arrived (loss, jitter, a slow client), falls back to the latest
    /// known input (last-input-hold) so a simulated entity never sees an
    /// empty input purely because of transient loss. Consumed and older
    /// records are dropped either way. Returns the input and whether it was
    /// an exact hit.
    pub fn consume_input(&mut self, tick: Tick) -> (InputVars, bool) {
        let exact = self.inputs.remove(&tick);
        self.inputs = self.inputs.split_off(&(tick + 1));

        match exact {
            Some(input) => (input, true),
            None => (
                self.latest_ack.map(|(_, input)| input).unwrap_or_default(),
                false,
            ),
        }
    }
}

/// Owns every peer session on the server side.
#[derive(Debug)]
pub struct SessionManager {
    by_addr: HashMap<SocketAddr, u32>,
    sessions: HashMap<u32, PeerSession>,
    next_peer_id: u32,
    max_peers: usize,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(max_peers: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            sessions: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(max_peers: usize, timeout: Duration) -> Self {
        let mut manager = Self::new(max_peers);
        manager.timeout = timeout;
        manager
    }

    /// Admits a new peer, or returns the existing session for a repeated
    /// registration from the same address (lost Welcome, client resend).
    pub fn register(
        &mut self,
        addr: SocketAddr,
        name: &str,
    ) -> Result<&mut PeerSession, RegistrationError> {
        if let Some(&peer_id) = self.by_addr.get(&addr) {
            return Ok(self
                .sessions
                .get_mut(&peer_id)
                .expect("address map points at live session"));
        }

        if self.sessions.len() >= self.max_peers {
            return Err(RegistrationError::ServerFull);
        }
        if self.sessions.values().any(|s| s.name == name) {
            return Err(RegistrationError::DuplicateName(name.to_string()));
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        self.sessions
            .insert(peer_id, PeerSession::new(addr, peer_id, name.to_string()));
        self.by_addr.insert(addr, peer_id);

        Ok(self.sessions.get_mut(&peer_id).unwrap())
    }

    pub fn get(&self, peer_id: u32) -> Option<&PeerSession> {
        self.sessions.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: u32) -> Option<&mut PeerSession> {
        self.sessions.get_mut(&peer_id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&PeerSession> {
        self.by_addr.get(addr).and_then(|id| self.sessions.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerSession> {
        if let Some(&id) = self.by_addr.get(addr) {
            self.sessions.get_mut(&id)
        } else {
            None
        }
    }

    /// Discards all session state immediately. Any reconciliation or
    /// replication in progress for the peer is simply abandoned.
    pub fn remove(&mut self, peer_id: u32) -> Option<PeerSession> {
        if let Some(session) = self.sessions.remove(&peer_id) {
            self.by_addr.remove(&session.addr);
            Some(session)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerSession> {
        self.sessions.values_mut()
    }

    /// Removes and returns every session whose peer has gone quiet, so the
    /// caller can despawn entities and report the disconnects.
    pub fn sweep_timed_out(&mut self) -> Vec<PeerSession> {
        let timed_out: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == PeerStatus::Active)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputFlags;
    use glam::Vec3;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn input_with_flags(flags: InputFlags) -> InputVars {
        InputVars::new(Vec3::ZERO, Vec3::ZERO, flags)
    }

    #[test]
    fn registration_limits() {
        let mut manager = SessionManager::new(2);
        manager.register(test_addr(1000), "ciliate").unwrap();
        manager.register(test_addr(1001), "flagellate").unwrap();

        assert!(matches!(
            manager.register(test_addr(1002), "ameba"),
            Err(RegistrationError::ServerFull)
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut manager = SessionManager::new(8);
        manager.register(test_addr(1000), "ciliate").unwrap();

        assert!(matches!(
            manager.register(test_addr(1001), "ciliate"),
            Err(RegistrationError::DuplicateName(_))
        ));
    }

    #[test]
    fn repeated_registration_returns_existing_session() {
        let mut manager = SessionManager::new(8);
        let id = manager.register(test_addr(1000), "ciliate").unwrap().peer_id;
        let again = manager.register(test_addr(1000), "ciliate").unwrap();
        assert_eq!(again.peer_id, id);
        assert_eq!(manager.total_count(), 1);
    }

    #[test]
    fn batch_merge_skips_acked_ticks() {
        let mut session = PeerSession::new(test_addr(1000), 1, "m".into());

        let old = input_with_flags(InputFlags::ENGULF);
        let new = input_with_flags(InputFlags::SPRINT);

        session.merge_input_batch(&InputBatch {
            start_tick: 1,
            inputs: vec![old; 4],
        });
        assert_eq!(session.acked_input_tick(), 4);

        for tick in 1..=3 {
            let (input, exact) = session.consume_input(tick);
            assert!(exact);
            assert_eq!(input, old);
        }

        // A redundant batch overlapping the acked range only contributes
        // the genuinely new ticks 5 and 6; tick 4 keeps its first value.
        session.merge_input_batch(&InputBatch {
            start_tick: 1,
            inputs: vec![new; 6],
        });
        assert_eq!(session.acked_input_tick(), 6);
        assert_eq!(session.buffered_input_count(), 3);

        assert_eq!(session.consume_input(4), (old, true));
        assert_eq!(session.consume_input(5), (new, true));
    }

    #[test]
    fn input_hold_on_missing_ticks() {
        let mut session = PeerSession::new(test_addr(1000), 1, "m".into());
        let forward = input_with_flags(InputFlags::SPRINT);

        session.merge_input_batch(&InputBatch {
            start_tick: 1,
            inputs: vec![forward, forward],
        });

        assert_eq!(session.consume_input(1), (forward, true));
        assert_eq!(session.consume_input(2), (forward, true));

        // Ticks 3 and 4 never arrived: the hold policy repeats tick 2.
        assert_eq!(session.consume_input(3), (forward, false));
        assert_eq!(session.consume_input(4), (forward, false));
        assert_eq!(session.acked_input_tick(), 2);
    }

    #[test]
    fn hold_before_any_input_is_neutral() {
        let mut session = PeerSession::new(test_addr(1000), 1, "m".into());
        let (input, exact) = session.consume_input(10);
        assert!(!exact);
        assert_eq!(input, InputVars::default());
    }
}
