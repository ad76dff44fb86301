use glam::{Quat, Vec3};

use crate::input::InputVars;
use crate::net::wire::{Reader, WireError, put_f32};

/// Server-assigned identifier, strictly increasing, never reused while the
/// entity is registered.
pub type EntityId = u32;

/// Resource identifier used to instantiate an entity on a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Microbe = 0,
    Chunk = 1,
    Agent = 2,
}

impl TryFrom<u8> for EntityKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(EntityKind::Microbe),
            1 => Ok(EntityKind::Chunk),
            2 => Ok(EntityKind::Agent),
            _ => Err(WireError::Malformed("entity kind")),
        }
    }
}

/// Minimal physical state carried per tick: enough for reconciliation and
/// interpolation, nothing more.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Option<Vec3>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: None,
        }
    }
}

impl StateSnapshot {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_f32(out, self.position.x);
        put_f32(out, self.position.y);
        put_f32(out, self.position.z);
        put_f32(out, self.rotation.x);
        put_f32(out, self.rotation.y);
        put_f32(out, self.rotation.z);
        put_f32(out, self.rotation.w);
        match self.velocity {
            Some(v) => {
                out.push(1);
                put_f32(out, v.x);
                put_f32(out, v.y);
                put_f32(out, v.z);
            }
            None => out.push(0),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(41);
        self.encode(&mut out);
        out
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let position = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
        let rotation = Quat::from_xyzw(r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?);
        let velocity = match r.read_u8()? {
            0 => None,
            1 => Some(Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?)),
            _ => return Err(WireError::Malformed("velocity tag")),
        };
        Ok(Self {
            position,
            rotation,
            velocity,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Self::decode(&mut Reader::new(bytes))
    }

    /// Squared positional distance to another snapshot, the quantity the
    /// reconciler compares against its tolerance.
    pub fn position_error_squared(&self, other: &StateSnapshot) -> f32 {
        (self.position - other.position).length_squared()
    }
}

/// The contract every replicated entity fulfils towards the netcode.
///
/// `state`/`apply_state` are the per-tick serialize/deserialize pair;
/// `write_spawn` produces the one-shot full payload used when the entity is
/// first replicated to a peer. `step` must be deterministic: identical
/// (state, input) pairs produce identical successor states.
pub trait NetworkedEntity {
    fn kind(&self) -> EntityKind;

    fn state(&self) -> StateSnapshot;

    fn apply_state(&mut self, state: StateSnapshot);

    fn step(&mut self, input: &InputVars, dt: f32);

    fn write_spawn(&self, out: &mut Vec<u8>);

    /// Infrequent non-physical state, synchronized over the reliable
    /// channel. Most kinds have none.
    fn write_vars(&self, _out: &mut Vec<u8>) {}

    fn apply_vars(&mut self, _bytes: &[u8]) -> Result<(), WireError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_snapshot_roundtrip() {
        let snap = StateSnapshot {
            position: Vec3::new(1.0, 2.0, -3.5),
            rotation: Quat::from_rotation_y(0.7),
            velocity: Some(Vec3::new(0.1, 0.0, -0.2)),
        };
        assert_eq!(StateSnapshot::from_bytes(&snap.to_bytes()).unwrap(), snap);

        let without_velocity = StateSnapshot {
            velocity: None,
            ..snap
        };
        let bytes = without_velocity.to_bytes();
        assert_eq!(bytes.len(), 29);
        assert_eq!(StateSnapshot::from_bytes(&bytes).unwrap(), without_velocity);
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(EntityKind::try_from(3).is_err());
        assert_eq!(EntityKind::try_from(1).unwrap(), EntityKind::Chunk);
    }
}
