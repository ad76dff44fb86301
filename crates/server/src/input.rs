//! Server-side input reconciliation: one input per simulated tick per peer,
//! with last-input-hold carrying entities over gaps in the stream.

use std::collections::HashMap;

use cytos::{EntityId, InputVars, PeerStatus, SessionManager, Tick, World};

/// Inputs resolved for one simulation tick, keyed by the entity they steer.
#[derive(Debug, Default)]
pub struct TickInputs {
    inputs: HashMap<EntityId, InputVars>,
    held: usize,
}

impl TickInputs {
    pub fn get(&self, entity_id: EntityId) -> InputVars {
        self.inputs.get(&entity_id).copied().unwrap_or_default()
    }

    /// How many peers ran on held (not freshly received) input this tick.
    pub fn held_count(&self) -> usize {
        self.held
    }
}

/// Resolves the exact input for `tick` from every active peer's buffer,
/// falling back to the hold policy where the tick never arrived.
pub fn collect_tick_inputs(sessions: &mut SessionManager, tick: Tick) -> TickInputs {
    let mut resolved = TickInputs::default();

    for session in sessions.iter_mut() {
        if session.status != PeerStatus::Active {
            continue;
        }
        let Some(entity_id) = session.entity_id else {
            continue;
        };

        let (input, exact) = session.consume_input(tick);
        if !exact {
            resolved.held += 1;
            log::trace!("peer {} input held at tick {}", session.peer_id, tick);
        }
        resolved.inputs.insert(entity_id, input);
    }

    resolved
}

/// Advances every live entity by one tick. Entities without a steering peer
/// (chunks, agents, abandoned cells) receive the neutral input.
pub fn step_world(world: &mut World, inputs: &TickInputs, dt: f32) {
    for (id, entity) in world.iter_mut() {
        let input = inputs.get(id);
        entity.step(&input, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cytos::{InputBatch, InputFlags, Microbe, pack_movement};
    use glam::Vec3;

    fn forward_input() -> InputVars {
        InputVars {
            look_at: Vec3::new(0.0, 0.0, -100.0),
            movement: pack_movement(Vec3::new(0.0, 0.0, -1.0)),
            flags: InputFlags::empty(),
        }
    }

    /// Ten forward ticks with the batch carrying ticks 3-4 lost in transit:
    /// the hold policy substitutes tick 2's input and motion never stalls.
    #[test]
    fn dropped_ticks_keep_entity_moving() {
        let mut sessions = SessionManager::new(4);
        let mut world = World::new();
        world.set_tick(1);

        let addr = "127.0.0.1:4000".parse().unwrap();
        let entity_id = world.register(Box::new(Microbe::at(Vec3::ZERO)));
        let forward = forward_input();
        let peer_id = {
            let session = sessions.register(addr, "swimmer").unwrap();
            session.status = PeerStatus::Active;
            session.entity_id = Some(entity_id);
            session.merge_input_batch(&InputBatch {
                start_tick: 1,
                inputs: vec![forward; 2],
            });
            session.peer_id
        };

        let dt = 1.0 / 60.0;
        let mut last_z = 0.0f32;
        let mut held_ticks = 0;

        for tick in 1..=10u32 {
            // The batch covering ticks 3-4 was dropped; the next redundant
            // batch arrives once the server has simulated past the gap.
            if tick == 5 {
                sessions.get_mut(peer_id).unwrap().merge_input_batch(&InputBatch {
                    start_tick: 3,
                    inputs: vec![forward; 8],
                });
            }

            let inputs = collect_tick_inputs(&mut sessions, tick);
            held_ticks += inputs.held_count();
            step_world(&mut world, &inputs, dt);
            world.advance_tick();

            let z = world.state_of(entity_id).unwrap().position.z;
            assert!(z < last_z, "forward motion must not stall at tick {}", tick);
            last_z = z;
        }

        // Only ticks 3 and 4 ran on held input.
        assert_eq!(held_ticks, 2);
    }

    #[test]
    fn unsteered_entities_get_neutral_input() {
        let mut sessions = SessionManager::new(4);
        let mut world = World::new();
        let chunk_id = world.register(Box::new(cytos::Chunk::new(Vec3::ONE, 5.0)));

        let inputs = collect_tick_inputs(&mut sessions, 0);
        step_world(&mut world, &inputs, 1.0 / 60.0);

        // A chunk with zero velocity stays put under neutral input.
        assert_eq!(world.state_of(chunk_id).unwrap().position, Vec3::ONE);
    }
}
