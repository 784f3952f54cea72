//! World Events and Observers
//!
//! Events raised during a fixed step, plus an explicit observer list for
//! collaborators that want callbacks instead of polling step results.
//!
//! Observers are plain boxed closures keyed by component kind (attach and
//! detach notifications) or by entity (collision start/stop).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::ecs::{ComponentEvent, ComponentKind, EntityId};

// =============================================================================
// EVENTS
// =============================================================================

/// Whether a contact began or ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPhase {
    /// First frame of contact.
    Started,
    /// First frame after contact ended.
    Stopped,
}

/// Contact change seen from `entity`'s side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionEvent {
    /// Started or stopped.
    pub phase: ContactPhase,
    /// Entity whose contact record changed.
    pub entity: EntityId,
    /// The other party.
    pub other: EntityId,
    /// Frame index of the change.
    pub frame: u64,
}

/// Everything a step reports back to its caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// Contact began or ended.
    Collision(CollisionEvent),
    /// A pilot fired a projectile.
    ProjectileFired {
        /// New projectile.
        projectile: EntityId,
        /// Firing entity.
        owner: EntityId,
        /// Frame index.
        frame: u64,
    },
    /// An entity's lifetime ran out and it was removed.
    Expired {
        /// Removed entity.
        entity: EntityId,
        /// Frame index.
        frame: u64,
    },
}

impl WorldEvent {
    /// Frame the event belongs to.
    pub fn frame(&self) -> u64 {
        match self {
            WorldEvent::Collision(ev) => ev.frame,
            WorldEvent::ProjectileFired { frame, .. } | WorldEvent::Expired { frame, .. } => *frame,
        }
    }

    /// The collision payload, if any.
    pub fn as_collision(&self) -> Option<&CollisionEvent> {
        match self {
            WorldEvent::Collision(ev) => Some(ev),
            _ => None,
        }
    }
}

// =============================================================================
// OBSERVERS
// =============================================================================

/// Handle returned on registration, used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

type Callback<E> = Box<dyn FnMut(&E) + Send>;

struct Observers<E> {
    entries: Vec<(ObserverId, Callback<E>)>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<E> Observers<E> {
    fn notify(&mut self, event: &E) {
        for (_, callback) in &mut self.entries {
            callback(event);
        }
    }

    fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }
}

/// Registry of component and collision observers.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    components: BTreeMap<ComponentKind, Observers<ComponentEvent>>,
    collision_start: BTreeMap<EntityId, Observers<CollisionEvent>>,
    collision_stop: BTreeMap<EntityId, Observers<CollisionEvent>>,
}

impl EventBus {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` whenever a component of `kind` is attached or detached.
    pub fn on_component<F>(&mut self, kind: ComponentKind, f: F) -> ObserverId
    where
        F: FnMut(&ComponentEvent) + Send + 'static,
    {
        let id = self.allocate();
        self.components.entry(kind).or_default().entries.push((id, Box::new(f)));
        id
    }

    /// Call `f` when `entity` starts touching something.
    pub fn on_collision_start<F>(&mut self, entity: EntityId, f: F) -> ObserverId
    where
        F: FnMut(&CollisionEvent) + Send + 'static,
    {
        let id = self.allocate();
        self.collision_start.entry(entity).or_default().entries.push((id, Box::new(f)));
        id
    }

    /// Call `f` when `entity` stops touching something.
    pub fn on_collision_stop<F>(&mut self, entity: EntityId, f: F) -> ObserverId
    where
        F: FnMut(&CollisionEvent) + Send + 'static,
    {
        let id = self.allocate();
        self.collision_stop.entry(entity).or_default().entries.push((id, Box::new(f)));
        id
    }

    /// Unregister. Returns `false` if the id was unknown.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let mut removed = false;
        for observers in self.components.values_mut() {
            removed |= observers.remove(id);
        }
        for observers in self.collision_start.values_mut() {
            removed |= observers.remove(id);
        }
        for observers in self.collision_stop.values_mut() {
            removed |= observers.remove(id);
        }
        removed
    }

    /// Drop all collision listeners of a despawned entity.
    pub fn forget_entity(&mut self, entity: EntityId) {
        self.collision_start.remove(&entity);
        self.collision_stop.remove(&entity);
    }

    /// Deliver a component change.
    pub fn emit_component(&mut self, event: &ComponentEvent) {
        if let Some(observers) = self.components.get_mut(&event.kind()) {
            observers.notify(event);
        }
    }

    /// Deliver a collision change to the listeners of `event.entity`.
    pub fn emit_collision(&mut self, event: &CollisionEvent) {
        let listeners = match event.phase {
            ContactPhase::Started => &mut self.collision_start,
            ContactPhase::Stopped => &mut self.collision_stop,
        };
        if let Some(observers) = listeners.get_mut(&event.entity) {
            observers.notify(event);
        }
    }

    fn allocate(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn count<K, E>(m: &BTreeMap<K, Observers<E>>) -> usize {
            m.values().map(|o| o.entries.len()).sum()
        }
        f.debug_struct("EventBus")
            .field("component_observers", &count(&self.components))
            .field("collision_start_listeners", &count(&self.collision_start))
            .field("collision_stop_listeners", &count(&self.collision_stop))
            .finish()
    }
}
