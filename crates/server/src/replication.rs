//! Server half of entity replication: spawn parades for joining peers,
//! spawn-request answers and despawn notifications.

use cytos::{EntityId, Message, World};

/// Full spawn message for one entity, or `None` if it is no longer live.
pub fn spawn_message(world: &World, id: EntityId) -> Option<Message> {
    world.spawn_payload(id).map(|(kind, payload)| Message::Spawn {
        id,
        kind: kind as u8,
        payload,
    })
}

/// Join-in-progress parade: one spawn message per live entity, in id order.
/// The peer was told the count up front and reports ready once its
/// replicated set has caught up.
pub fn join_parade(world: &World) -> Vec<Message> {
    world
        .ids()
        .filter_map(|id| spawn_message(world, id))
        .collect()
}

pub fn despawn_message(id: EntityId) -> Message {
    Message::Despawn { id }
}

/// Reliable sync of an entity's non-physical variables.
pub fn vars_message(world: &World, id: EntityId) -> Option<Message> {
    world.get(id).map(|entity| {
        let mut payload = Vec::new();
        entity.write_vars(&mut payload);
        Message::EntityVars { id, payload }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cytos::{Chunk, EntityKind, Microbe, spawn_entity};
    use glam::Vec3;

    #[test]
    fn parade_covers_every_live_entity() {
        let mut world = World::new();
        let a = world.register(Box::new(Microbe::at(Vec3::ZERO)));
        let b = world.register(Box::new(Chunk::new(Vec3::ONE, 3.0)));
        world.register(Box::new(Microbe::at(Vec3::ONE)));
        world.despawn(b);

        let parade = join_parade(&world);
        assert_eq!(parade.len(), world.len());
        assert!(matches!(parade[0], Message::Spawn { id, .. } if id == a));
    }

    #[test]
    fn spawn_message_rebuilds_entity() {
        let mut world = World::new();
        let id = world.register(Box::new(Microbe::new(Vec3::new(2.0, 0.0, 1.0), "Vorticella")));

        let Some(Message::Spawn { kind, payload, .. }) = spawn_message(&world, id) else {
            panic!("expected spawn message");
        };

        let rebuilt = spawn_entity(EntityKind::try_from(kind).unwrap(), &payload).unwrap();
        assert_eq!(rebuilt.state(), world.state_of(id).unwrap());
    }

    #[test]
    fn despawned_entity_has_no_spawn_message() {
        let mut world = World::new();
        let id = world.register(Box::new(Microbe::at(Vec3::ZERO)));
        world.despawn(id);
        assert!(spawn_message(&world, id).is_none());
    }
}
