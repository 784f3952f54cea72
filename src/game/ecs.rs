//! Entity/Component Storage
//!
//! Entities are plain integer ids. Each component type lives in its own
//! sparse set:
//!
//! ```text
//!  sparse: [ -, 0, -, 2, 1 ]      index = entity id, value = dense slot
//!  dense:  [ A, C, B ]            packed component values
//!  owners: [ 1, 4, 3 ]            entity owning each dense slot
//! ```
//!
//! The sparse side is split into fixed-size pages keyed by `id / PAGE_SIZE`.
//! A page is freed when its last slot empties, so memory follows the live
//! entities rather than the highest id ever allocated.
//!
//! Removal swaps the last dense slot into the hole, so dense order is not
//! insertion order; callers that need a stable order sort by id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::game::components::ComponentStore;

// =============================================================================
// ENTITY ID
// =============================================================================

/// Opaque entity identifier, local to one simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Raw integer value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    fn page(self) -> (u32, usize) {
        (self.0 / PAGE_SIZE as u32, self.0 as usize % PAGE_SIZE)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// SPARSE SET
// =============================================================================

/// Entity slots per sparse page.
pub const PAGE_SIZE: usize = 64;

#[derive(Clone, Debug)]
struct SparsePage {
    slots: Box<[Option<usize>; PAGE_SIZE]>,
    used: usize,
}

impl SparsePage {
    fn new() -> Self {
        Self {
            slots: Box::new([None; PAGE_SIZE]),
            used: 0,
        }
    }
}

/// Sparse/dense storage for one component type.
#[derive(Clone, Debug)]
pub struct SparseSet<T> {
    pages: BTreeMap<u32, SparsePage>,
    dense: Vec<T>,
    owners: Vec<EntityId>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self {
            pages: BTreeMap::new(),
            dense: Vec::new(),
            owners: Vec::new(),
        }
    }
}

impl<T> SparseSet<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous value.
    pub fn insert(&mut self, id: EntityId, value: T) -> Option<T> {
        if let Some(slot) = self.slot(id) {
            return Some(std::mem::replace(&mut self.dense[slot], value));
        }
        let (page, offset) = id.page();
        let page = self.pages.entry(page).or_insert_with(SparsePage::new);
        page.slots[offset] = Some(self.dense.len());
        page.used += 1;
        self.dense.push(value);
        self.owners.push(id);
        None
    }

    /// Remove and return the value for `id`.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self.slot(id)?;
        let (page_key, offset) = id.page();
        if let Some(page) = self.pages.get_mut(&page_key) {
            page.slots[offset] = None;
            page.used -= 1;
            if page.used == 0 {
                self.pages.remove(&page_key);
            }
        }

        let last = self.dense.len() - 1;
        if slot != last {
            let moved = self.owners[last];
            let (moved_page, moved_offset) = moved.page();
            if let Some(page) = self.pages.get_mut(&moved_page) {
                page.slots[moved_offset] = Some(slot);
            }
        }
        self.owners.swap_remove(slot);
        Some(self.dense.swap_remove(slot))
    }

    /// Borrow the value for `id`.
    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.slot(id).map(|slot| &self.dense[slot])
    }

    /// Mutably borrow the value for `id`.
    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slot(id).map(move |slot| &mut self.dense[slot])
    }

    /// Whether `id` has a value.
    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.slot(id).is_some()
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Sparse pages currently allocated.
    #[cfg(test)]
    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Owners sorted ascending.
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids = self.owners.clone();
        ids.sort_unstable();
        ids
    }

    #[inline]
    fn slot(&self, id: EntityId) -> Option<usize> {
        let (page, offset) = id.page();
        self.pages.get(&page).and_then(|p| p.slots[offset])
    }
}

// =============================================================================
// COMPONENT TRAIT
// =============================================================================

/// Tag for each component type, used by observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// [`Transform`](crate::game::components::Transform)
    Transform,
    /// [`RigidMotion`](crate::game::components::RigidMotion)
    RigidMotion,
    /// [`Collider`](crate::game::components::Collider)
    Collider,
    /// [`Owner`](crate::game::components::Owner)
    Owner,
    /// [`Pilot`](crate::game::components::Pilot)
    Pilot,
    /// [`Contacts`](crate::game::components::Contacts)
    Contacts,
    /// [`Lifetime`](crate::game::components::Lifetime)
    Lifetime,
}

/// Attach/detach notification raised at the point of mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentEvent {
    /// Component attached to an entity that did not have it.
    Added(EntityId, ComponentKind),
    /// Component detached (explicitly or by despawn).
    Removed(EntityId, ComponentKind),
}

impl ComponentEvent {
    /// Kind of the component involved.
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentEvent::Added(_, kind) | ComponentEvent::Removed(_, kind) => *kind,
        }
    }

    /// Entity involved.
    pub fn entity(&self) -> EntityId {
        match self {
            ComponentEvent::Added(id, _) | ComponentEvent::Removed(id, _) => *id,
        }
    }
}

/// A plain value type stored per entity.
pub trait Component: Clone + Default + Send + Sync + 'static {
    /// Tag used for change notifications.
    const KIND: ComponentKind;

    /// Storage for this type.
    fn storage(store: &ComponentStore) -> &SparseSet<Self>;

    /// Mutable storage for this type.
    fn storage_mut(store: &mut ComponentStore) -> &mut SparseSet<Self>;
}
