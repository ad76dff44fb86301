//! Concrete entity kinds and the deterministic movement step they share.
//!
//! This is the simulation-advance half of the collaborator contract: the
//! netcode only ever calls [`NetworkedEntity::step`] and the pure
//! [`step_movement`] function, both of which map identical (state, input)
//! pairs to identical successor states.

use glam::{Quat, Vec3};

use crate::input::InputVars;
use crate::net::wire::{Reader, WireError, put_f32};
use crate::snapshot::{EntityKind, NetworkedEntity, StateSnapshot};

pub const MICROBE_ACCELERATION: f32 = 40.0;
pub const MICROBE_MAX_SPEED: f32 = 12.0;
pub const LINEAR_DAMPING: f32 = 4.0;

const DEFAULT_MICROBE_RADIUS: f32 = 1.0;

/// Advances one entity state by one tick. Pure function: no clocks, no
/// randomness, no lookahead.
pub fn step_movement(state: &StateSnapshot, input: &InputVars, dt: f32) -> StateSnapshot {
    let mut velocity = state.velocity.unwrap_or(Vec3::ZERO);

    let direction = input.movement_direction();
    if direction != Vec3::ZERO {
        velocity += direction.normalize() * MICROBE_ACCELERATION * dt;
    }

    velocity *= 1.0 / (1.0 + LINEAR_DAMPING * dt);

    let speed_squared = velocity.length_squared();
    if speed_squared > MICROBE_MAX_SPEED * MICROBE_MAX_SPEED {
        velocity *= MICROBE_MAX_SPEED / speed_squared.sqrt();
    }

    let position = state.position + velocity * dt;

    let facing = input.look_at - position;
    let rotation = if facing.length_squared() > 1e-6 {
        Quat::from_rotation_arc(Vec3::NEG_Z, facing.normalize())
    } else {
        state.rotation
    };

    StateSnapshot {
        position,
        rotation,
        velocity: Some(velocity),
    }
}

/// Player-controlled cell. The only kind that consumes input.
#[derive(Debug, Clone)]
pub struct Microbe {
    state: StateSnapshot,
    pub species_name: String,
    pub radius: f32,
}

impl Microbe {
    pub fn new(position: Vec3, species_name: impl Into<String>) -> Self {
        Self {
            state: StateSnapshot {
                position,
                rotation: Quat::IDENTITY,
                velocity: Some(Vec3::ZERO),
            },
            species_name: species_name.into(),
            radius: DEFAULT_MICROBE_RADIUS,
        }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, "Primum")
    }
}

impl NetworkedEntity for Microbe {
    fn kind(&self) -> EntityKind {
        EntityKind::Microbe
    }

    fn state(&self) -> StateSnapshot {
        self.state
    }

    fn apply_state(&mut self, state: StateSnapshot) {
        self.state = state;
    }

    fn step(&mut self, input: &InputVars, dt: f32) {
        self.state = step_movement(&self.state, input, dt);
    }

    fn write_spawn(&self, out: &mut Vec<u8>) {
        write_name(out, &self.species_name);
        put_f32(out, self.radius);
        self.state.encode(out);
    }

    fn write_vars(&self, out: &mut Vec<u8>) {
        write_name(out, &self.species_name);
    }

    fn apply_vars(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.species_name = read_name(&mut Reader::new(bytes))?;
        Ok(())
    }
}

/// Free-floating organic matter. Drifts with its residual velocity.
#[derive(Debug, Clone)]
pub struct Chunk {
    state: StateSnapshot,
    pub compound_amount: f32,
}

impl Chunk {
    pub fn new(position: Vec3, compound_amount: f32) -> Self {
        Self {
            state: StateSnapshot {
                position,
                rotation: Quat::IDENTITY,
                velocity: Some(Vec3::ZERO),
            },
            compound_amount,
        }
    }
}

impl NetworkedEntity for Chunk {
    fn kind(&self) -> EntityKind {
        EntityKind::Chunk
    }

    fn state(&self) -> StateSnapshot {
        self.state
    }

    fn apply_state(&mut self, state: StateSnapshot) {
        self.state = state;
    }

    fn step(&mut self, _input: &InputVars, dt: f32) {
        let mut velocity = self.state.velocity.unwrap_or(Vec3::ZERO);
        velocity *= 1.0 / (1.0 + LINEAR_DAMPING * dt);
        self.state.position += velocity * dt;
        self.state.velocity = Some(velocity);
    }

    fn write_spawn(&self, out: &mut Vec<u8>) {
        put_f32(out, self.compound_amount);
        self.state.encode(out);
    }
}

/// Secreted toxin agent. Travels in a straight line until despawned by
/// gameplay.
#[derive(Debug, Clone)]
pub struct Agent {
    state: StateSnapshot,
    pub potency: f32,
}

impl Agent {
    pub fn new(position: Vec3, velocity: Vec3, potency: f32) -> Self {
        Self {
            state: StateSnapshot {
                position,
                rotation: Quat::IDENTITY,
                velocity: Some(velocity),
            },
            potency,
        }
    }
}

impl NetworkedEntity for Agent {
    fn kind(&self) -> EntityKind {
        EntityKind::Agent
    }

    fn state(&self) -> StateSnapshot {
        self.state
    }

    fn apply_state(&mut self, state: StateSnapshot) {
        self.state = state;
    }

    fn step(&mut self, _input: &InputVars, dt: f32) {
        let velocity = self.state.velocity.unwrap_or(Vec3::ZERO);
        self.state.position += velocity * dt;
    }

    fn write_spawn(&self, out: &mut Vec<u8>) {
        put_f32(out, self.potency);
        self.state.encode(out);
    }
}

/// Spawn factory: rebuilds an entity of the given kind from its full spawn
/// payload, as produced by [`NetworkedEntity::write_spawn`].
pub fn spawn_entity(kind: EntityKind, payload: &[u8]) -> Result<Box<dyn NetworkedEntity>, WireError> {
    let mut r = Reader::new(payload);
    match kind {
        EntityKind::Microbe => {
            let species_name = read_name(&mut r)?;
            let radius = r.read_f32()?;
            let state = StateSnapshot::decode(&mut r)?;
            let mut microbe = Microbe::new(state.position, species_name);
            microbe.radius = radius;
            microbe.apply_state(state);
            Ok(Box::new(microbe))
        }
        EntityKind::Chunk => {
            let compound_amount = r.read_f32()?;
            let state = StateSnapshot::decode(&mut r)?;
            let mut chunk = Chunk::new(state.position, compound_amount);
            chunk.apply_state(state);
            Ok(Box::new(chunk))
        }
        EntityKind::Agent => {
            let potency = r.read_f32()?;
            let state = StateSnapshot::decode(&mut r)?;
            let mut agent = Agent::new(state.position, Vec3::ZERO, potency);
            agent.apply_state(state);
            Ok(Box::new(agent))
        }
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
}

fn read_name(r: &mut Reader<'_>) -> Result<String, WireError> {
    let len = r.read_u8()? as usize;
    let bytes = r.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::Malformed("species name"))
}
