//! Little-endian wire codecs for the fixed-layout payloads that travel on
//! the unreliable plane: input batches, heartbeats and world state maps.

use std::collections::BTreeMap;

use crate::input::{INPUT_VARS_WIRE_SIZE, InputBatch, InputVars};
use crate::snapshot::EntityId;
use crate::tick::Tick;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unexpected end of payload")]
    UnexpectedEnd,
    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// Cursor over a received payload. All reads are little-endian.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_bits().to_le_bytes());
}

/// Per-tick map of serialized entity state, as carried by a heartbeat.
///
/// The map is ordered so encoding is deterministic for a given world state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldStateMap {
    pub entities: BTreeMap<EntityId, Vec<u8>>,
}

impl WorldStateMap {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.entities.len() as u32);
        for (id, state) in &self.entities {
            put_u32(out, *id);
            put_u16(out, state.len() as u16);
            out.extend_from_slice(state);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let count = r.read_u32()?;
        let mut entities = BTreeMap::new();
        for _ in 0..count {
            let id = r.read_u32()?;
            let len = r.read_u16()? as usize;
            entities.insert(id, r.read_bytes(len)?.to_vec());
        }
        Ok(Self { entities })
    }
}

/// Periodic server broadcast: producing tick, the recipient's latest
/// acknowledged input tick, and the serialized world state.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub tick: Tick,
    pub acked_input_tick: Tick,
    pub state: WorldStateMap,
}

impl Heartbeat {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 6 * self.state.entities.len());
        put_u32(&mut out, self.tick);
        put_u32(&mut out, self.acked_input_tick);
        self.state.encode(&mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let tick = r.read_u32()?;
        let acked_input_tick = r.read_u32()?;
        let state = WorldStateMap::decode(&mut r)?;
        Ok(Self {
            tick,
            acked_input_tick,
            state,
        })
    }
}

pub fn encode_input_batch(batch: &InputBatch) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + INPUT_VARS_WIRE_SIZE * batch.inputs.len());
    put_u32(&mut out, batch.start_tick);
    for input in &batch.inputs {
        input.write(&mut out);
    }
    out
}

/// Records run back-to-back until the buffer ends; the count is implied by
/// the payload length.
pub fn decode_input_batch(buf: &[u8]) -> Result<InputBatch, WireError> {
    let mut r = Reader::new(buf);
    let start_tick = r.read_u32()?;
    if r.remaining() % INPUT_VARS_WIRE_SIZE != 0 {
        return Err(WireError::Malformed("input batch length"));
    }
    let mut inputs = Vec::with_capacity(r.remaining() / INPUT_VARS_WIRE_SIZE);
    while r.remaining() > 0 {
        inputs.push(InputVars::read(&mut r)?);
    }
    Ok(InputBatch { start_tick, inputs })
}
