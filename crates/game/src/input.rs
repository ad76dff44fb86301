use bitflags::bitflags;
use glam::Vec3;

use crate::net::wire::{Reader, WireError, put_f32};
use crate::tick::Tick;

/// Wire size of one [`InputVars`] record: 12 byte look-at + packed movement
/// byte + flag byte.
pub const INPUT_VARS_WIRE_SIZE: usize = 14;

const SIGN_SHIFT: u8 = 0;
const MAGNITUDE_SHIFT: u8 = 3;
const MOVEMENT_MASK: u8 = 0b0011_1111;

bitflags! {
    /// One-byte action bitmask sampled alongside movement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputFlags: u8 {
        const ENGULF = 1 << 0;
        const SPRINT = 1 << 1;
        const EMIT_AGENT = 1 << 2;
        const SECRETE_SLIME = 1 << 3;
        const DIVIDE = 1 << 4;
        const INTERACT = 1 << 5;
    }
}

/// Fixed-size input record sampled once per physics tick.
///
/// Value equality is what suppresses redundant work downstream, so the
/// packed movement byte is stored as sampled rather than re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputVars {
    pub look_at: Vec3,
    pub movement: u8,
    pub flags: InputFlags,
}

impl InputVars {
    pub fn new(look_at: Vec3, direction: Vec3, flags: InputFlags) -> Self {
        Self {
            look_at,
            movement: pack_movement(direction),
            flags,
        }
    }

    /// Unpacked movement direction, each axis in {-1, 0, 1}.
    pub fn movement_direction(&self) -> Vec3 {
        unpack_movement(self.movement)
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        put_f32(out, self.look_at.x);
        put_f32(out, self.look_at.y);
        put_f32(out, self.look_at.z);
        out.push(self.movement & MOVEMENT_MASK);
        out.push(self.flags.bits());
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let look_at = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
        let movement = r.read_u8()? & MOVEMENT_MASK;
        let flags = InputFlags::from_bits_retain(r.read_u8()?);
        Ok(Self {
            look_at,
            movement,
            flags,
        })
    }
}

/// Packs a movement direction into 3 sign bits (low) + 3 magnitude bits.
/// Axes with magnitude 0 always carry a cleared sign bit, so every packed
/// value has a single canonical encoding.
pub fn pack_movement(direction: Vec3) -> u8 {
    let mut packed = 0u8;
    for (axis, value) in [direction.x, direction.y, direction.z].into_iter().enumerate() {
        if value < -0.5 {
            packed |= 1 << (SIGN_SHIFT + axis as u8);
            packed |= 1 << (MAGNITUDE_SHIFT + axis as u8);
        } else if value > 0.5 {
            packed |= 1 << (MAGNITUDE_SHIFT + axis as u8);
        }
    }
    packed
}

pub fn unpack_movement(packed: u8) -> Vec3 {
    let mut axes = [0.0f32; 3];
    for (axis, slot) in axes.iter_mut().enumerate() {
        if packed & (1 << (MAGNITUDE_SHIFT + axis as u8)) != 0 {
            *slot = if packed & (1 << (SIGN_SHIFT + axis as u8)) != 0 {
                -1.0
            } else {
                1.0
            };
        }
    }
    Vec3::from_array(axes)
}

/// Ordered run of inputs covering `[start_tick, start_tick + inputs.len())`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBatch {
    pub start_tick: Tick,
    pub inputs: Vec<InputVars>,
}

impl InputBatch {
    pub fn end_tick(&self) -> Tick {
        self.start_tick + self.inputs.len() as Tick
    }

    pub fn covers(&self, tick: Tick) -> bool {
        tick >= self.start_tick && tick < self.end_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::wire::{decode_input_batch, encode_input_batch};

    #[test]
    fn movement_packing() {
        let packed = pack_movement(Vec3::new(1.0, 0.0, -1.0));
        assert_eq!(unpack_movement(packed), Vec3::new(1.0, 0.0, -1.0));
        assert_eq!(pack_movement(Vec3::ZERO), 0);
    }

    #[test]
    fn wire_roundtrip_every_movement_and_flag() {
        // Every 6-bit movement pattern crossed with every flag byte must
        // survive the 14-byte record unchanged.
        let looks = [
            Vec3::ZERO,
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-1000.5, 0.25, 1e6),
        ];
        for look_at in looks {
            for movement in 0u8..64 {
                for flags in 0u16..=255 {
                    let input = InputVars {
                        look_at,
                        movement,
                        flags: InputFlags::from_bits_retain(flags as u8),
                    };
                    let mut buf = Vec::new();
                    input.write(&mut buf);
                    assert_eq!(buf.len(), INPUT_VARS_WIRE_SIZE);

                    let decoded = InputVars::read(&mut Reader::new(&buf)).unwrap();
                    assert_eq!(decoded, input);
                }
            }
        }
    }

    #[test]
    fn batch_coverage() {
        let batch = InputBatch {
            start_tick: 10,
            inputs: vec![InputVars::default(); 3],
        };
        assert!(batch.covers(10));
        assert!(batch.covers(12));
        assert!(!batch.covers(13));
        assert!(!batch.covers(9));

        let decoded = decode_input_batch(&encode_input_batch(&batch)).unwrap();
        assert_eq!(decoded, batch);
    }
}
