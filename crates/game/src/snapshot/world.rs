use std::collections::BTreeMap;

use crate::net::wire::WorldStateMap;
use crate::snapshot::entity::{EntityId, EntityKind, NetworkedEntity, StateSnapshot};
use crate::tick::Tick;

/// Live set of networked entities, keyed by their replication id.
///
/// Iteration order is id order, which keeps snapshot capture and batched
/// simulation deterministic across runs.
pub struct World {
    tick: Tick,
    entities: BTreeMap<EntityId, Box<dyn NetworkedEntity>>,
    next_entity_id: EntityId,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            tick: 0,
            entities: BTreeMap::new(),
            next_entity_id: 1,
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Registers a server-created entity under a fresh id. Ids only ever
    /// grow; a despawned id is never handed out again.
    pub fn register(&mut self, entity: Box<dyn NetworkedEntity>) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.entities.insert(id, entity);
        id
    }

    /// Inserts an entity replicated from the server under its announced id.
    /// Returns false when the id is already live (duplicate spawn message).
    pub fn insert_replicated(&mut self, id: EntityId, entity: Box<dyn NetworkedEntity>) -> bool {
        if self.entities.contains_key(&id) {
            return false;
        }
        self.next_entity_id = self.next_entity_id.max(id + 1);
        self.entities.insert(id, entity);
        true
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&dyn NetworkedEntity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn NetworkedEntity>> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (EntityId, &mut Box<dyn NetworkedEntity>)> {
        self.entities.iter_mut().map(|(id, e)| (*id, e))
    }

    pub fn state_of(&self, id: EntityId) -> Option<StateSnapshot> {
        self.entities.get(&id).map(|e| e.state())
    }

    /// Serializes every live entity into a per-tick state map. Entities not
    /// in the map are simply not yet replicated, never implicitly deleted.
    pub fn capture(&self) -> WorldStateMap {
        let mut map = WorldStateMap::default();
        for (id, entity) in &self.entities {
            map.entities.insert(*id, entity.state().to_bytes());
        }
        map
    }

    /// Full spawn payload for one entity, as sent when it is first
    /// replicated to a peer.
    pub fn spawn_payload(&self, id: EntityId) -> Option<(EntityKind, Vec<u8>)> {
        self.entities.get(&id).map(|e| {
            let mut payload = Vec::new();
            e.write_spawn(&mut payload);
            (e.kind(), payload)
        })
    }
}
