use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use cytos::{
    Datagram, EntityId, EntityKind, Heartbeat, InputVars, Message, NetworkEndpoint, NetworkStats,
    Packet, PacketHeader, PingTracker, RawPacket, ReliableChannel, StateSnapshot, Tick, TickClock,
    World, encode_input_batch, spawn_entity, tick_delta,
};

use crate::config::ClientConfig;
use crate::net::input::InputSampler;
use crate::net::interpolation::Interpolator;
use crate::net::prediction::{ReconcileOutcome, Reconciler};
use crate::net::replication::ReplicaTracker;

/// Where the client currently sits between "not playing" and "playing".
/// Every hard failure lands back in `Disconnected` with a reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Registering,
    Joining,
    Active,
    Disconnected { reason: String },
}

/// Client-side orchestrator: owns the transport, the adaptive clock, the
/// predicted local entity and the interpolated remote ones, and drives the
/// whole update cycle from a single thread.
pub struct NetworkClient {
    endpoint: NetworkEndpoint,
    config: ClientConfig,
    state: ClientState,
    peer_id: Option<u32>,
    clock: TickClock,
    ping: PingTracker,
    reliable: ReliableChannel,
    send_sequence: u32,
    world: World,
    local_entity: Option<EntityId>,
    reconciler: Reconciler,
    interpolator: Interpolator,
    sampler: InputSampler,
    replicas: ReplicaTracker,
    tick_rate: u32,
    send_rate: u32,
    last_ping_time: Instant,
    register_started: Option<Instant>,
    last_heartbeat_tick: Option<Tick>,
    resyncs: u64,
    replays: u64,
}

impl NetworkClient {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind("0.0.0.0:0")?;
        endpoint.set_timeout(Duration::from_secs(config.connection_timeout_secs));

        Ok(Self {
            endpoint,
            state: ClientState::Idle,
            peer_id: None,
            clock: TickClock::new(config.tick_rate),
            ping: PingTracker::new(),
            reliable: ReliableChannel::new(),
            send_sequence: 0,
            world: World::new(),
            local_entity: None,
            reconciler: Reconciler::with_tolerance(config.prediction_tolerance),
            interpolator: Interpolator::new(config.send_rate),
            sampler: InputSampler::new(),
            replicas: ReplicaTracker::new(),
            tick_rate: config.tick_rate,
            send_rate: config.send_rate,
            last_ping_time: Instant::now(),
            register_started: None,
            last_heartbeat_tick: None,
            resyncs: 0,
            replays: 0,
            config,
        })
    }

    pub fn connect(&mut self, server_addr: SocketAddr) -> io::Result<()> {
        log::info!("registering with {} as '{}'", server_addr, self.config.name);

        self.endpoint.set_remote(server_addr);
        self.endpoint.mark_received();
        self.state = ClientState::Registering;
        self.register_started = Some(Instant::now());

        self.send_message(Message::Register {
            name: self.config.name.clone(),
        })
    }

    /// Announces the departure and drops all session state. Fire-and-forget:
    /// if the packet is lost, the server timeout does the same cleanup.
    pub fn disconnect(&mut self) {
        if matches!(self.state, ClientState::Joining | ClientState::Active) {
            let _ = self.send_message(Message::Leave);
        }
        self.reset("left".to_string());
    }

    fn reset(&mut self, reason: String) {
        self.state = ClientState::Disconnected { reason };
        self.peer_id = None;
        self.local_entity = None;
        self.world = World::new();
        self.reconciler = Reconciler::with_tolerance(self.config.prediction_tolerance);
        self.interpolator.clear();
        self.sampler.reset();
        self.replicas.reset();
        self.reliable = ReliableChannel::new();
        self.last_heartbeat_tick = None;
        self.register_started = None;
    }

    /// One frame of the client loop: drain the network, keep reliable
    /// messages flowing, then run as many predicted ticks as the adaptive
    /// clock grants.
    pub fn update(&mut self, delta_seconds: f32, input: InputVars) -> io::Result<()> {
        self.process_network()?;
        self.process_resends();

        match &self.state {
            ClientState::Registering | ClientState::Joining => {
                if let Some(started) = self.register_started {
                    if started.elapsed() > Duration::from_secs(self.config.connection_timeout_secs)
                    {
                        log::warn!("connection timed out during join");
                        self.reset("connection timed out".to_string());
                        return Ok(());
                    }
                }
                self.send_periodic_ping()?;
            }
            ClientState::Active => {
                self.clock.accumulate(delta_seconds);
                while self.clock.consume_tick() {
                    self.run_local_tick(input)?;
                }

                self.interpolator.update(delta_seconds);
                self.send_periodic_ping()?;

                if self.endpoint.is_timed_out() {
                    log::warn!("server went quiet; disconnecting");
                    self.reset("connection timed out".to_string());
                }
            }
            ClientState::Idle | ClientState::Disconnected { .. } => {}
        }

        Ok(())
    }

    /// Predicting: sample input, optimistically advance the owned entity,
    /// and every other tick ship the unacknowledged input run.
    fn run_local_tick(&mut self, input: InputVars) -> io::Result<()> {
        let tick = self.clock.tick();
        let dt = self.clock.base_dt();

        self.sampler.record(tick, input);
        if let Some(id) = self.local_entity {
            let predicted = self.reconciler.predict(tick, &input, dt);
            if let Some(entity) = self.world.get_mut(id) {
                entity.apply_state(predicted);
            }
        }

        if tick % 2 == 0 {
            if let Some(batch) = self.sampler.build_batch(tick) {
                self.send_message(Message::InputBatch {
                    payload: encode_input_batch(&batch),
                })?;
            }
        }

        self.clock.advance();
        Ok(())
    }

    fn send_periodic_ping(&mut self) -> io::Result<()> {
        if self.last_ping_time.elapsed().as_secs_f32() >= self.config.ping_interval_secs {
            let ping = self.ping.start_ping();
            self.endpoint.send_raw(&ping)?;
            self.last_ping_time = Instant::now();
        }
        Ok(())
    }

    fn send_message(&mut self, message: Message) -> io::Result<()> {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);

        if message.is_reliable() {
            self.reliable.track(sequence, message.clone());
        }

        let packet = Packet::new(PacketHeader::new(sequence), message);
        self.endpoint.send(&packet)?;
        Ok(())
    }

    fn process_resends(&mut self) {
        for (sequence, message) in self.reliable.due_resends() {
            let packet = Packet::new(PacketHeader::new(sequence), message);
            let _ = self.endpoint.send(&packet);
        }
    }

    fn process_network(&mut self) -> io::Result<()> {
        for (datagram, _addr) in self.endpoint.receive()? {
            match datagram {
                Datagram::Raw(RawPacket::Pong { id, .. }) => {
                    if let Some(rtt) = self.ping.complete(id) {
                        self.endpoint.stats_mut().rtt_ms = self.ping.srtt_ms();
                        self.endpoint.stats_mut().rtt_variance = self.ping.rtt_var_ms();
                        log::trace!("pong {} rtt {:.1} ms", id, rtt);
                    }
                }
                Datagram::Raw(RawPacket::Ping { .. }) => {}
                Datagram::Message(packet) => self.handle_message(packet),
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, packet: Packet) {
        let sequence = packet.header.sequence;
        let message = packet.message;

        if message.is_reliable() {
            let fresh = self.reliable.accept(sequence);
            let _ = self.send_message(Message::ReliableAck { sequence });
            if !fresh {
                return;
            }
        }

        match message {
            Message::Welcome {
                peer_id,
                server_tick,
                tick_rate,
                send_rate,
                entity_count,
            } => self.handle_welcome(peer_id, server_tick, tick_rate, send_rate, entity_count),
            Message::Denied { reason } => {
                log::warn!("registration denied: {}", reason);
                self.reset(reason);
            }
            Message::Spawn { id, kind, payload } => self.handle_spawn(id, kind, &payload),
            Message::Possess { id } => self.handle_possess(id),
            Message::Despawn { id } => self.handle_despawn(id),
            Message::EntityVars { id, payload } => {
                if let Some(entity) = self.world.get_mut(id) {
                    if let Err(e) = entity.apply_vars(&payload) {
                        log::debug!("bad vars for entity {}: {}", id, e);
                    }
                }
            }
            Message::Kick { reason } => {
                log::warn!("kicked: {}", reason);
                self.reset(reason);
            }
            Message::Heartbeat { payload } => self.handle_heartbeat(&payload),
            Message::ReliableAck { sequence } => self.reliable.ack(sequence),
            other => log::debug!("ignoring {} from server", other.name()),
        }
    }

    fn handle_welcome(
        &mut self,
        peer_id: u32,
        server_tick: Tick,
        tick_rate: u32,
        send_rate: u32,
        entity_count: u32,
    ) {
        log::info!(
            "welcome: peer {} at server tick {}, {} entities to replicate",
            peer_id,
            server_tick,
            entity_count
        );

        self.peer_id = Some(peer_id);
        self.tick_rate = tick_rate;
        self.send_rate = send_rate;
        self.clock = TickClock::new(tick_rate);
        self.interpolator.set_send_rate(send_rate);
        self.state = ClientState::Joining;

        // Initial hard sync: place the local tick a latency margin ahead of
        // the server.
        self.clock
            .adjust_client_tick(server_tick, self.ping.srtt_seconds(), self.clock.base_dt());
        self.resyncs += 1;

        self.replicas.set_expected(entity_count);
        if self.replicas.take_ready() {
            let _ = self.send_message(Message::JoinReady);
        }
    }

    fn handle_spawn(&mut self, id: EntityId, kind: u8, payload: &[u8]) {
        let kind = match EntityKind::try_from(kind) {
            Ok(kind) => kind,
            Err(e) => {
                log::debug!("spawn of entity {} rejected: {}", id, e);
                return;
            }
        };
        let entity = match spawn_entity(kind, payload) {
            Ok(entity) => entity,
            Err(e) => {
                log::debug!("spawn payload for entity {} rejected: {}", id, e);
                return;
            }
        };

        if self.world.insert_replicated(id, entity) {
            log::debug!("replicated entity {} ({:?})", id, kind);
        }
        self.replicas.on_spawn(id);

        if self.local_entity == Some(id) {
            // Possess can outrun the spawn broadcast; adopt the state now.
            if let Some(state) = self.world.state_of(id) {
                self.reconciler.reset_to(state);
            }
        }

        if self.state == ClientState::Joining && self.replicas.take_ready() {
            log::info!(
                "join parade complete ({} entities)",
                self.replicas.replicated_count()
            );
            let _ = self.send_message(Message::JoinReady);
        }
    }

    fn handle_possess(&mut self, id: EntityId) {
        log::info!("possessing entity {}", id);
        self.local_entity = Some(id);

        // Prediction and interpolation are mutually exclusive per entity.
        self.interpolator.remove(id);
        if let Some(state) = self.world.state_of(id) {
            self.reconciler.reset_to(state);
        }
        self.state = ClientState::Active;
    }

    fn handle_despawn(&mut self, id: EntityId) {
        self.world.despawn(id);
        self.interpolator.remove(id);
        self.replicas.on_despawn(id);
        if self.local_entity == Some(id) {
            log::info!("local entity {} despawned", id);
            self.local_entity = None;
        }
    }

    fn handle_heartbeat(&mut self, payload: &[u8]) {
        let heartbeat = match Heartbeat::decode(payload) {
            Ok(hb) => hb,
            Err(e) => {
                log::debug!("bad heartbeat: {}", e);
                return;
            }
        };

        let server_tick = heartbeat.tick;
        self.last_heartbeat_tick = Some(
            self.last_heartbeat_tick
                .map_or(server_tick, |t| t.max(server_tick)),
        );
        self.sampler.set_acked(heartbeat.acked_input_tick);

        // A heartbeat from our own present or future means the local clock
        // fell behind entirely: hard resync, no reconciliation against it.
        let resynced = if server_tick >= self.clock.tick() {
            self.clock.adjust_client_tick(
                server_tick,
                self.ping.srtt_seconds(),
                self.clock.base_dt(),
            );
            self.resyncs += 1;
            true
        } else {
            let lead = tick_delta(server_tick, heartbeat.acked_input_tick);
            self.clock.adjust_tick_rate(lead, self.send_rate);
            false
        };

        for (id, bytes) in &heartbeat.state.entities {
            if !self.world.contains(*id) {
                // Not yet replicated; ask instead of waiting for a spawn
                // broadcast that may never come.
                if self.replicas.should_request(*id) {
                    log::debug!("heartbeat references unknown entity {}, requesting", id);
                    let _ = self.send_message(Message::SpawnRequest { id: *id });
                }
                continue;
            }

            let snapshot = match StateSnapshot::from_bytes(bytes) {
                Ok(snap) => snap,
                Err(e) => {
                    log::debug!("bad state for entity {}: {}", id, e);
                    continue;
                }
            };

            if self.local_entity == Some(*id) {
                if !resynced {
                    let outcome = self.reconciler.reconcile(
                        server_tick,
                        &snapshot,
                        self.clock.tick(),
                        self.sampler.ring(),
                        self.clock.base_dt(),
                    );
                    if matches!(outcome, ReconcileOutcome::Replayed { .. }) {
                        self.replays += 1;
                    }
                    if let Some(entity) = self.world.get_mut(*id) {
                        entity.apply_state(self.reconciler.current());
                    }
                }
            } else {
                self.interpolator.push(*id, server_tick, snapshot);
                if let Some(entity) = self.world.get_mut(*id) {
                    entity.apply_state(snapshot);
                }
            }
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ClientState::Active
    }

    pub fn peer_id(&self) -> Option<u32> {
        self.peer_id
    }

    pub fn local_entity(&self) -> Option<EntityId> {
        self.local_entity
    }

    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Tick of the newest heartbeat seen, if any.
    pub fn last_server_tick(&self) -> Option<Tick> {
        self.last_heartbeat_tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// The state gameplay should display for an entity: the predicted
    /// timeline for the locally owned one, the interpolated track for
    /// everything else. The two paths never cross.
    pub fn displayed_state(&self, id: EntityId) -> Option<StateSnapshot> {
        if self.local_entity == Some(id) {
            Some(self.reconciler.current())
        } else {
            self.interpolator.sample(id)
        }
    }

    pub fn predicted_state(&self) -> Option<StateSnapshot> {
        self.local_entity.map(|_| self.reconciler.current())
    }

    /// Whether an entity currently has an interpolation track. The locally
    /// predicted entity never does.
    pub fn is_interpolated(&self, id: EntityId) -> bool {
        self.interpolator.contains(id)
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn rtt_ms(&self) -> f32 {
        self.ping.srtt_ms()
    }

    pub fn clock_multiplier(&self) -> f32 {
        self.clock.multiplier()
    }

    pub fn replays(&self) -> u64 {
        self.replays
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn replicated_count(&self) -> usize {
        self.replicas.replicated_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let client = NetworkClient::new(ClientConfig::default()).unwrap();
        assert_eq!(*client.state(), ClientState::Idle);
        assert!(client.local_entity().is_none());
    }

    #[test]
    fn displayed_state_is_none_for_unknown_entities() {
        let client = NetworkClient::new(ClientConfig::default()).unwrap();
        assert!(client.displayed_state(42).is_none());
    }
}
