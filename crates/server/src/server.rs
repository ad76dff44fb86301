use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use glam::Vec3;

use cytos::{
    Datagram, EntityId, Heartbeat, Message, Microbe, NetworkEndpoint, NetworkStats,
    NetworkedEntity, Packet, PacketHeader, PacketLossSimulation, PeerSession, PeerStatus,
    RawPacket, SessionManager, TickRing, World, WorldStateMap, decode_input_batch,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::input::{collect_tick_inputs, step_world};
use crate::replication::{despawn_message, join_parade, spawn_message, vars_message};

const SPAWN_RING_RADIUS: f32 = 6.0;

/// Authoritative simulation host: one blocking loop drives socket drain,
/// message dispatch, the fixed-step world and the heartbeat broadcast, all
/// on one thread.
pub struct GameServer {
    endpoint: NetworkEndpoint,
    sessions: SessionManager,
    config: ServerConfig,
    world: World,
    snapshots: TickRing<WorldStateMap>,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    start_time: Instant,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
    loss_sim: PacketLossSimulation,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind(bind_addr)?;
        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate as f64);
        let loss_sim = if config.loss_percent > 0.0 {
            PacketLossSimulation::with_loss(config.loss_percent)
        } else {
            PacketLossSimulation::default()
        };

        Ok(Self {
            endpoint,
            sessions: SessionManager::with_timeout(
                config.max_peers,
                Duration::from_secs(config.peer_timeout_secs),
            ),
            world: World::new(),
            snapshots: TickRing::new(config.snapshot_history),
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            start_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            loss_sim,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_sessions("server shutting down");
    }

    pub fn shutdown_sessions(&mut self, reason: &str) {
        let peer_ids: Vec<u32> = self.sessions.iter().map(|s| s.peer_id).collect();
        for peer_id in peer_ids {
            self.kick_peer(peer_id, reason);
        }
    }

    /// One pass of the outer loop: drain the socket, service reliable
    /// resends, then run as many fixed steps as real time has accumulated.
    pub fn tick_once(&mut self) {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("network error: {}", e),
            });
        }
        self.process_resends();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.step_tick();
        }
    }

    fn step_tick(&mut self) {
        let tick = self.world.tick();
        let dt = 1.0 / self.config.tick_rate as f32;

        let inputs = collect_tick_inputs(&mut self.sessions, tick);
        step_world(&mut self.world, &inputs, dt);

        self.snapshots.insert(tick, self.world.capture());
        self.world.advance_tick();

        if tick % self.config.ticks_per_heartbeat() == 0 {
            self.broadcast_heartbeats(tick);
        }

        for session in self.sessions.sweep_timed_out() {
            log::info!("peer {} ({}) timed out", session.peer_id, session.name);
            self.drop_peer_entity(&session);
            self.pending_events.push_back(ServerEvent::PeerDisconnected {
                peer_id: session.peer_id,
                reason: DisconnectReason::Timeout,
            });
        }
    }

    /// Registers a server-created entity and announces it to every peer
    /// that already receives world data.
    pub fn spawn_world_entity(&mut self, entity: Box<dyn NetworkedEntity>) -> EntityId {
        let id = self.world.register(entity);
        if let Some(message) = spawn_message(&self.world, id) {
            self.broadcast(message);
        }
        id
    }

    pub fn despawn_world_entity(&mut self, id: EntityId) {
        if self.world.despawn(id) {
            self.broadcast(despawn_message(id));
        }
    }

    pub fn kick_peer(&mut self, peer_id: u32, reason: &str) {
        // Single-shot farewell: the session is gone right after, so the
        // reliable machinery cannot carry this one.
        if let Some(session) = self.sessions.get_mut(peer_id) {
            let sequence = session.next_sequence();
            let packet = Packet::new(
                PacketHeader::new(sequence),
                Message::Kick {
                    reason: reason.to_string(),
                },
            );
            let addr = session.addr;
            let _ = self.endpoint.send_to(&packet, addr);
        }

        if let Some(session) = self.sessions.remove(peer_id) {
            self.drop_peer_entity(&session);
            self.pending_events.push_back(ServerEvent::PeerDisconnected {
                peer_id,
                reason: DisconnectReason::Kicked,
            });
        }
    }

    fn drop_peer_entity(&mut self, session: &PeerSession) {
        if let Some(entity_id) = session.entity_id {
            if self.world.despawn(entity_id) {
                self.broadcast(despawn_message(entity_id));
            }
        }
    }

    fn broadcast_heartbeats(&mut self, tick: u32) {
        let Some(state) = self.snapshots.try_get(tick).cloned() else {
            return;
        };

        let recipients: Vec<u32> = self
            .sessions
            .iter()
            .filter(|s| s.status == PeerStatus::Active)
            .map(|s| s.peer_id)
            .collect();

        for peer_id in recipients {
            if self.loss_sim.should_drop() {
                continue;
            }

            let Some(session) = self.sessions.get_mut(peer_id) else {
                continue;
            };
            if session.loss_sim.should_drop() {
                continue;
            }

            let heartbeat = Heartbeat {
                tick,
                acked_input_tick: session.acked_input_tick(),
                state: state.clone(),
            };
            let message = Message::Heartbeat {
                payload: heartbeat.encode(),
            };
            if let Err(e) = send_message(&mut self.endpoint, session, message) {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("heartbeat send failed: {}", e),
                });
            }
        }
    }

    /// Sends a control message to every peer already receiving world data
    /// (joining peers must hear spawns too, or their parade count lies).
    fn broadcast(&mut self, message: Message) {
        let recipients: Vec<u32> = self
            .sessions
            .iter()
            .filter(|s| matches!(s.status, PeerStatus::Active | PeerStatus::Joining))
            .map(|s| s.peer_id)
            .collect();

        for peer_id in recipients {
            if let Some(session) = self.sessions.get_mut(peer_id) {
                let _ = send_message(&mut self.endpoint, session, message.clone());
            }
        }
    }

    fn process_resends(&mut self) {
        for session in self.sessions.iter_mut() {
            let addr = session.addr;
            for (sequence, message) in session.reliable.due_resends() {
                let packet = Packet::new(PacketHeader::new(sequence), message);
                let _ = self.endpoint.send_to(&packet, addr);
            }
        }
    }

    fn process_network(&mut self) -> io::Result<()> {
        for (datagram, addr) in self.endpoint.receive()? {
            match datagram {
                Datagram::Raw(RawPacket::Ping { id }) => {
                    let pong = RawPacket::Pong {
                        id,
                        server_clock_ms: self.start_time.elapsed().as_millis() as u64,
                    };
                    let _ = self.endpoint.send_raw_to(&pong, addr);
                    if let Some(session) = self.sessions.get_by_addr_mut(&addr) {
                        session.touch();
                    }
                }
                Datagram::Raw(RawPacket::Pong { .. }) => {}
                Datagram::Message(packet) => self.handle_message(packet, addr),
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, packet: Packet, addr: SocketAddr) {
        let sequence = packet.header.sequence;
        let message = packet.message;

        // Registration is the one message that may arrive without a session.
        if let Message::Register { name } = &message {
            self.handle_register(addr, name.clone(), sequence);
            return;
        }

        let Some(session) = self.sessions.get_by_addr_mut(&addr) else {
            log::debug!("{} from unknown peer {}", message.name(), addr);
            return;
        };
        session.touch();
        session.stats.packets_received += 1;

        if message.is_reliable() {
            let fresh = session.reliable.accept(sequence);
            let _ = send_message(
                &mut self.endpoint,
                session,
                Message::ReliableAck { sequence },
            );
            if !fresh {
                return;
            }
        }

        match message {
            Message::ReliableAck { sequence } => {
                if let Some(session) = self.sessions.get_by_addr_mut(&addr) {
                    session.reliable.ack(sequence);
                }
            }
            Message::InputBatch { payload } => self.handle_input_batch(addr, &payload),
            Message::JoinReady => self.handle_join_ready(addr),
            Message::SpawnRequest { id } => self.handle_spawn_request(addr, id),
            Message::EntityVars { id, payload } => self.handle_entity_vars(addr, id, &payload),
            Message::Leave => self.handle_leave(addr),
            other => {
                log::debug!("ignoring {} from {}", other.name(), addr);
            }
        }
    }

    fn handle_register(&mut self, addr: SocketAddr, name: String, sequence: u32) {
        self.pending_events
            .push_back(ServerEvent::PeerRegistering { addr });

        let server_tick = self.world.tick();
        let entity_count = self.world.len() as u32;
        let (tick_rate, send_rate) = (self.config.tick_rate, self.config.send_rate);

        match self.sessions.register(addr, &name) {
            Ok(session) => {
                session.touch();
                if !session.reliable.accept(sequence) {
                    // Resent registration; the Welcome resend path covers it.
                    let _ = send_message(
                        &mut self.endpoint,
                        session,
                        Message::ReliableAck { sequence },
                    );
                    return;
                }
                let _ = send_message(
                    &mut self.endpoint,
                    session,
                    Message::ReliableAck { sequence },
                );

                if session.status != PeerStatus::Lobby {
                    return;
                }
                session.status = PeerStatus::Joining;
                session.announced_entities = entity_count;

                let peer_id = session.peer_id;
                log::info!("peer {} registered as '{}' from {}", peer_id, name, addr);

                let _ = send_message(
                    &mut self.endpoint,
                    session,
                    Message::Welcome {
                        peer_id,
                        server_tick,
                        tick_rate,
                        send_rate,
                        entity_count,
                    },
                );

                // Join-in-progress parade: the full spawn payload of every
                // live entity, one message each.
                for spawn in join_parade(&self.world) {
                    if let Some(session) = self.sessions.get_mut(peer_id) {
                        let _ = send_message(&mut self.endpoint, session, spawn);
                    }
                }
            }
            Err(e) => {
                let reason = e.to_string();
                log::warn!("registration from {} denied: {}", addr, reason);
                let packet = Packet::new(PacketHeader::new(0), Message::Denied {
                    reason: reason.clone(),
                });
                let _ = self.endpoint.send_to(&packet, addr);
                self.pending_events
                    .push_back(ServerEvent::RegistrationDenied { addr, reason });
            }
        }
    }

    fn handle_join_ready(&mut self, addr: SocketAddr) {
        let Some(session) = self.sessions.get_by_addr_mut(&addr) else {
            return;
        };
        if session.status != PeerStatus::Joining {
            return;
        }

        let peer_id = session.peer_id;
        let name = session.name.clone();
        session.status = PeerStatus::Active;

        let entity_id = self
            .world
            .register(Box::new(Microbe::new(spawn_position(peer_id), name)));
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.entity_id = Some(entity_id);
        }

        if let Some(spawn) = spawn_message(&self.world, entity_id) {
            self.broadcast(spawn);
        }
        if let Some(session) = self.sessions.get_mut(peer_id) {
            let _ = send_message(
                &mut self.endpoint,
                session,
                Message::Possess { id: entity_id },
            );
        }

        log::info!("peer {} is active with entity {}", peer_id, entity_id);
        self.pending_events.push_back(ServerEvent::PeerJoined {
            peer_id,
            addr,
            entity_id,
        });
    }

    fn handle_input_batch(&mut self, addr: SocketAddr, payload: &[u8]) {
        let Some(session) = self.sessions.get_by_addr_mut(&addr) else {
            return;
        };
        if session.status != PeerStatus::Active {
            return;
        }

        match decode_input_batch(payload) {
            Ok(batch) => session.merge_input_batch(&batch),
            Err(e) => log::debug!("bad input batch from peer {}: {}", session.peer_id, e),
        }
    }

    /// Self-healing path: a client that saw an unknown id in a heartbeat
    /// asks for the spawn payload directly instead of waiting.
    fn handle_spawn_request(&mut self, addr: SocketAddr, id: EntityId) {
        let Some(session) = self.sessions.get_by_addr(&addr) else {
            return;
        };
        let peer_id = session.peer_id;

        match spawn_message(&self.world, id) {
            Some(spawn) => {
                if let Some(session) = self.sessions.get_mut(peer_id) {
                    let _ = send_message(&mut self.endpoint, session, spawn);
                }
            }
            None => log::debug!(
                "peer {} requested spawn of dead entity {}",
                peer_id,
                id
            ),
        }
    }

    fn handle_entity_vars(&mut self, addr: SocketAddr, id: EntityId, payload: &[u8]) {
        let Some(session) = self.sessions.get_by_addr(&addr) else {
            return;
        };
        // Peers may only retune their own entity.
        if session.entity_id != Some(id) {
            log::debug!("peer {} sent vars for foreign entity {}", session.peer_id, id);
            return;
        }

        let Some(entity) = self.world.get_mut(id) else {
            return;
        };
        if let Err(e) = entity.apply_vars(payload) {
            log::debug!("bad entity vars for {}: {}", id, e);
            return;
        }

        if let Some(vars) = vars_message(&self.world, id) {
            self.broadcast(vars);
        }
    }

    fn handle_leave(&mut self, addr: SocketAddr) {
        let Some(session) = self.sessions.get_by_addr(&addr) else {
            return;
        };
        let peer_id = session.peer_id;

        if let Some(session) = self.sessions.remove(peer_id) {
            log::info!("peer {} ({}) left", peer_id, session.name);
            self.drop_peer_entity(&session);
            self.pending_events.push_back(ServerEvent::PeerDisconnected {
                peer_id,
                reason: DisconnectReason::Graceful,
            });
        }
    }
}

/// Deterministic spawn placement: peers appear spread around a ring rather
/// than stacked at the origin.
fn spawn_position(peer_id: u32) -> Vec3 {
    let angle = peer_id as f32 * 2.399963; // golden angle
    Vec3::new(
        SPAWN_RING_RADIUS * angle.cos(),
        0.0,
        SPAWN_RING_RADIUS * angle.sin(),
    )
}

fn send_message(
    endpoint: &mut NetworkEndpoint,
    session: &mut PeerSession,
    message: Message,
) -> io::Result<()> {
    let sequence = session.next_sequence();
    if message.is_reliable() {
        session.reliable.track(sequence, message.clone());
    }

    let packet = Packet::new(PacketHeader::new(sequence), message);
    let bytes = endpoint.send_to(&packet, session.addr)?;

    session.stats.packets_sent += 1;
    session.stats.bytes_sent += bytes as u64;
    Ok(())
}
