mod entity;
mod world;

pub use entity::{EntityId, EntityKind, NetworkedEntity, StateSnapshot};
pub use world::World;
