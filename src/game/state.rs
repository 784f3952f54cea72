//! World State
//!
//! Owns entity ids, component storage, the last-built spatial index and the
//! observer registry. Every iteration helper returns ids in ascending order
//! so that a step visits entities in the same order on every run.

use std::collections::BTreeSet;
use std::sync::Arc;

use glam::{Quat, Vec3};
use tracing::debug;

use crate::config::{ShipTuning, SimConfig};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::math::{Aabb, Pose};
use crate::core::rng::DeterministicRng;
use crate::game::components::{
    Collider, CollisionMesh, ComponentStore, Contacts, Pilot, RigidMotion, Transform,
};
use crate::game::ecs::{Component, ComponentEvent, EntityId};
use crate::game::events::EventBus;
use crate::game::octree::SpatialIndex;

/// The simulated world.
#[derive(Debug)]
pub struct WorldState {
    /// Fixed steps completed.
    pub frame: u64,
    /// Seed for spawn placement, part of the state hash.
    pub seed: u64,
    /// Observer registry.
    pub bus: EventBus,
    next_id: u32,
    alive: BTreeSet<EntityId>,
    components: ComponentStore,
    bounds: Aabb,
    index: Option<SpatialIndex>,
    rng: DeterministicRng,
}

impl WorldState {
    /// Empty world.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            frame: 0,
            seed: config.seed,
            bus: EventBus::new(),
            next_id: 0,
            alive: BTreeSet::new(),
            components: ComponentStore::default(),
            bounds: config.world_bounds(),
            index: None,
            rng: DeterministicRng::new(config.seed),
        }
    }

    // ===== ENTITIES =====

    /// Allocate a new entity with no components.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.alive.insert(id);
        id
    }

    /// Remove an entity and all its components.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.alive.remove(&id) {
            return false;
        }
        for kind in self.components.kinds_of(id) {
            self.bus.emit_component(&ComponentEvent::Removed(id, kind));
        }
        self.components.remove_all(id);
        self.bus.forget_entity(id);
        debug!(entity = %id, frame = self.frame, "despawned");
        true
    }

    /// Whether `id` exists.
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.alive.contains(&id)
    }

    /// All live entities, ascending.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    // ===== COMPONENTS =====

    /// Attach or replace a component. Ignored for dead entities.
    pub fn insert<C: Component>(&mut self, id: EntityId, component: C) -> Option<C> {
        if !self.is_alive(id) {
            debug!(entity = %id, kind = ?C::KIND, "insert on dead entity ignored");
            return None;
        }
        let previous = C::storage_mut(&mut self.components).insert(id, component);
        if previous.is_none() {
            self.bus.emit_component(&ComponentEvent::Added(id, C::KIND));
        }
        previous
    }

    /// Detach a component.
    pub fn remove<C: Component>(&mut self, id: EntityId) -> Option<C> {
        let removed = C::storage_mut(&mut self.components).remove(id);
        if removed.is_some() {
            self.bus.emit_component(&ComponentEvent::Removed(id, C::KIND));
        }
        removed
    }

    /// Borrow a component.
    #[inline]
    pub fn get<C: Component>(&self, id: EntityId) -> Option<&C> {
        C::storage(&self.components).get(id)
    }

    /// Mutably borrow a component.
    #[inline]
    pub fn get_mut<C: Component>(&mut self, id: EntityId) -> Option<&mut C> {
        C::storage_mut(&mut self.components).get_mut(id)
    }

    /// Whether `id` has a component of type `C`.
    #[inline]
    pub fn has<C: Component>(&self, id: EntityId) -> bool {
        C::storage(&self.components).contains(id)
    }

    /// Entities with a `C`, ascending.
    pub fn entities_with<C: Component>(&self) -> Vec<EntityId> {
        C::storage(&self.components).sorted_ids()
    }

    /// Entities with both an `A` and a `B`, ascending.
    pub fn entities_with2<A: Component, B: Component>(&self) -> Vec<EntityId> {
        let b = B::storage(&self.components);
        let mut ids = self.entities_with::<A>();
        ids.retain(|id| b.contains(*id));
        ids
    }

    /// Sparse pages held across every component type.
    #[cfg(test)]
    pub(crate) fn sparse_pages(&self) -> usize {
        self.components.sparse_pages()
    }

    // ===== SPAWN HELPERS =====

    /// Spawn a piloted ship.
    pub fn spawn_ship(&mut self, position: Vec3, rotation: Quat, tuning: &ShipTuning) -> EntityId {
        let id = self.spawn();
        self.insert(id, Transform::at(position, rotation));
        self.insert(
            id,
            RigidMotion {
                acceleration: tuning.acceleration,
                angular_acceleration: tuning.angular_acceleration,
                damping: tuning.damping,
                angular_damping: tuning.angular_damping,
                ..RigidMotion::default()
            },
        );
        self.insert(id, Collider::sphere(tuning.radius));
        self.insert(id, Contacts::default());
        self.insert(id, Pilot::default());
        id
    }

    /// Spawn a piloted ship at a seeded random point in the inner half of the world.
    pub fn spawn_ship_random(&mut self, tuning: &ShipTuning) -> EntityId {
        let spawn_zone = Aabb::cube(self.bounds.center(), self.bounds.max.x.abs() * 0.5);
        let position = self.rng.point_in(&spawn_zone);
        self.spawn_ship(position, Quat::IDENTITY, tuning)
    }

    /// Spawn an unpiloted sphere body.
    pub fn spawn_body(&mut self, position: Vec3, velocity: Vec3, collider: Collider, damping: f32) -> EntityId {
        let id = self.spawn();
        self.insert(id, Transform::at(position, Quat::IDENTITY));
        self.insert(id, RigidMotion::drifting(velocity, damping));
        self.insert(id, collider);
        self.insert(id, Contacts::default());
        id
    }

    /// Spawn static mesh geometry.
    pub fn spawn_static_mesh(&mut self, position: Vec3, rotation: Quat, mesh: Arc<CollisionMesh>) -> EntityId {
        let id = self.spawn();
        self.insert(id, Transform::at(position, rotation));
        self.insert(id, Collider::mesh(mesh));
        self.insert(id, Contacts::default());
        id
    }

    // ===== SPATIAL INDEX =====

    /// World region.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Build a fresh index over every collider with a transform.
    ///
    /// Colliders with zero bounding radius (empty meshes) are left out.
    pub fn build_index(&self, config: &SimConfig) -> SpatialIndex {
        let items = self
            .entities_with2::<Transform, Collider>()
            .into_iter()
            .filter(|id| self.get::<Collider>(*id).map_or(false, |c| c.bounding_radius() > 0.0))
            .filter_map(|id| self.get::<Transform>(id).map(|t| (id, t.position)));
        SpatialIndex::build(self.bounds, config.octree_capacity, config.octree_max_depth, items)
    }

    /// Keep `index` for queries between steps.
    pub fn set_index(&mut self, index: SpatialIndex) {
        self.index = Some(index);
    }

    /// Index built by the last step.
    pub fn index(&self) -> Option<&SpatialIndex> {
        self.index.as_ref()
    }

    /// Entities within `radius` of `point`, ascending.
    ///
    /// Uses the index from the last step, or a linear scan before the first step.
    pub fn query_nearby(&self, point: Vec3, radius: f32) -> Vec<EntityId> {
        if let Some(index) = &self.index {
            return index.query(point, radius);
        }
        self.entities_with::<Transform>()
            .into_iter()
            .filter(|id| {
                self.get::<Transform>(*id)
                    .map_or(false, |t| t.position.distance(point) <= radius)
            })
            .collect()
    }

    // ===== VIEWS =====

    /// Current pose of an entity.
    pub fn pose(&self, id: EntityId) -> Option<Pose> {
        self.get::<Transform>(id).map(Transform::pose)
    }

    /// Hash of every transform and motion, in id order.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.frame, self.seed, |hasher| {
            hasher.update_u32(self.alive.len() as u32);
            for id in &self.alive {
                hasher.update_u32(id.raw());
                if let Some(t) = self.get::<Transform>(*id) {
                    hasher.update_vec3(t.position);
                    hasher.update_quat(t.rotation);
                }
                if let Some(m) = self.get::<RigidMotion>(*id) {
                    hasher.update_vec3(m.velocity);
                    hasher.update_vec3(m.angular_velocity);
                }
                if let Some(p) = self.get::<Pilot>(*id) {
                    hasher.update_u32(p.last_processed());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ecs::ComponentKind;
    use std::sync::Mutex;

    #[test]
    fn test_spawn_and_despawn() {
        let mut world = WorldState::new(&SimConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [ComponentKind::Transform, ComponentKind::Pilot] {
            let sink = seen.clone();
            world.bus.on_component(kind, move |ev| sink.lock().unwrap().push(*ev));
        }

        let ship = world.spawn_ship(Vec3::ZERO, Quat::IDENTITY, &ShipTuning::default());
        assert!(world.is_alive(ship));
        assert!(world.has::<Pilot>(ship));
        assert!(seen
            .lock()
            .unwrap()
            .contains(&ComponentEvent::Added(ship, ComponentKind::Transform)));

        assert!(world.despawn(ship));
        assert!(!world.despawn(ship));
        assert!(world.get::<Transform>(ship).is_none());
        assert!(seen
            .lock()
            .unwrap()
            .contains(&ComponentEvent::Removed(ship, ComponentKind::Pilot)));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut world = WorldState::new(&SimConfig::default());
        let a = world.spawn();
        world.despawn(a);
        let b = world.spawn();
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_on_dead_entity_ignored() {
        let mut world = WorldState::new(&SimConfig::default());
        let id = world.spawn();
        world.despawn(id);
        assert!(world.insert(id, Transform::default()).is_none());
        assert!(!world.has::<Transform>(id));
    }

    #[test]
    fn test_component_observer_fires() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut world = WorldState::new(&SimConfig::default());
        let sink = seen.clone();
        world.bus.on_component(ComponentKind::Collider, move |ev| sink.lock().unwrap().push(*ev));

        let id = world.spawn_body(Vec3::ZERO, Vec3::X, Collider::sphere(1.0), 1.0);
        world.remove::<Collider>(id);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ComponentEvent::Added(id, ComponentKind::Collider),
                ComponentEvent::Removed(id, ComponentKind::Collider),
            ]
        );
    }

    #[test]
    fn test_query_nearby_with_and_without_index() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        let near = world.spawn_body(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, Collider::sphere(1.0), 1.0);
        let far = world.spawn_body(Vec3::new(50.0, 0.0, 0.0), Vec3::ZERO, Collider::sphere(1.0), 1.0);

        assert_eq!(world.query_nearby(Vec3::ZERO, 2.0), vec![near]);

        let index = world.build_index(&config);
        world.set_index(index);
        assert_eq!(world.query_nearby(Vec3::ZERO, 100.0), vec![near, far]);
    }

    #[test]
    fn test_empty_mesh_not_indexed() {
        let config = SimConfig::default();
        let mut world = WorldState::new(&config);
        world.spawn_static_mesh(Vec3::ZERO, Quat::IDENTITY, Arc::new(CollisionMesh::default()));
        assert!(world.build_index(&config).is_empty());
    }

    #[test]
    fn test_hash_tracks_state() {
        let config = SimConfig::default();
        let mut a = WorldState::new(&config);
        let mut b = WorldState::new(&config);
        let id_a = a.spawn_ship_random(&config.ship);
        let id_b = b.spawn_ship_random(&config.ship);
        assert_eq!(a.pose(id_a), b.pose(id_b));
        assert_eq!(a.compute_hash(), b.compute_hash());

        if let Some(t) = b.get_mut::<Transform>(id_b) {
            t.position.x += 1.0;
        }
        assert_ne!(a.compute_hash(), b.compute_hash());
    }
}
