//! Component Types
//!
//! Plain value structs attached to entities. Each has a `Default` and is
//! `Clone`, which is all the copy/reset behavior the simulation needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::math::{ray_triangle, Pose};
use crate::game::ecs::{Component, ComponentKind, EntityId, SparseSet};
use crate::game::input::InputSnapshot;

// =============================================================================
// TRANSFORM
// =============================================================================

/// Pose plus the pose captured at the start of the current step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Current position.
    pub position: Vec3,
    /// Current orientation.
    pub rotation: Quat,
    /// Position before this step's integration.
    pub previous_position: Vec3,
    /// Orientation before this step's integration.
    pub previous_rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::at(Vec3::ZERO, Quat::IDENTITY)
    }
}

impl Transform {
    /// Transform at rest at the given pose (previous = current).
    pub fn at(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            previous_position: position,
            previous_rotation: rotation,
        }
    }

    /// Copy the current pose into the previous pose.
    #[inline]
    pub fn snapshot_previous(&mut self) {
        self.previous_position = self.position;
        self.previous_rotation = self.rotation;
    }

    /// Current pose.
    #[inline]
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    /// Pose captured before this step.
    #[inline]
    pub fn previous_pose(&self) -> Pose {
        Pose::new(self.previous_position, self.previous_rotation)
    }

    /// Interpolated pose for display. Never written back.
    #[inline]
    pub fn render_pose(&self, alpha: f32) -> Pose {
        Pose::interpolate(self.previous_pose(), self.pose(), alpha)
    }

    /// Move without interpolation (both poses set).
    pub fn teleport(&mut self, position: Vec3, rotation: Quat) {
        *self = Self::at(position, rotation);
    }
}

// =============================================================================
// RIGID MOTION
// =============================================================================

/// Linear and angular velocity with per-second decay factors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidMotion {
    /// Linear velocity (units per second).
    pub velocity: Vec3,
    /// Angular velocity (local axes, radians-ish per second).
    pub angular_velocity: Vec3,
    /// Thrust per unit of input axis.
    pub acceleration: f32,
    /// Turn rate per unit of roll/yaw/pitch input.
    pub angular_acceleration: f32,
    /// Fraction of velocity kept after one second.
    pub damping: f32,
    /// Fraction of angular velocity kept after one second.
    pub angular_damping: f32,
    /// Set by the rest check at the start of each step.
    pub resting: bool,
}

impl Default for RigidMotion {
    fn default() -> Self {
        Self {
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            acceleration: 0.0,
            angular_acceleration: 0.0,
            damping: 1.0,
            angular_damping: 1.0,
            resting: true,
        }
    }
}

impl RigidMotion {
    /// Body drifting at a constant velocity with the given damping.
    pub fn drifting(velocity: Vec3, damping: f32) -> Self {
        Self {
            velocity,
            damping,
            resting: false,
            ..Self::default()
        }
    }
}

// =============================================================================
// COLLIDER
// =============================================================================

/// Triangle soup in entity-local space.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionMesh {
    /// Triangles as vertex triples.
    pub triangles: Vec<[Vec3; 3]>,
}

impl CollisionMesh {
    /// Create from triangles.
    pub fn new(triangles: Vec<[Vec3; 3]>) -> Self {
        Self { triangles }
    }

    /// Axis-aligned box mesh centered on the local origin.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents.abs();
        let c = |x: f32, y: f32, z: f32| Vec3::new(x * h.x, y * h.y, z * h.z);
        let corners = [
            c(-1.0, -1.0, -1.0),
            c(1.0, -1.0, -1.0),
            c(1.0, 1.0, -1.0),
            c(-1.0, 1.0, -1.0),
            c(-1.0, -1.0, 1.0),
            c(1.0, -1.0, 1.0),
            c(1.0, 1.0, 1.0),
            c(-1.0, 1.0, 1.0),
        ];
        const FACES: [[usize; 4]; 6] = [
            [0, 1, 2, 3],
            [5, 4, 7, 6],
            [4, 0, 3, 7],
            [1, 5, 6, 2],
            [3, 2, 6, 7],
            [4, 5, 1, 0],
        ];
        let triangles = FACES
            .iter()
            .flat_map(|[a, b, c2, d]| {
                [
                    [corners[*a], corners[*b], corners[*c2]],
                    [corners[*a], corners[*c2], corners[*d]],
                ]
            })
            .collect();
        Self { triangles }
    }

    /// Distance from the local origin to the farthest vertex. Zero when empty.
    pub fn bounding_radius(&self) -> f32 {
        self.triangles
            .iter()
            .flat_map(|tri| tri.iter())
            .map(|v| v.length())
            .fold(0.0, f32::max)
    }

    /// Nearest hit of a local-space ray within `max_dist`.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<(f32, Vec3)> {
        self.triangles
            .iter()
            .filter_map(|[a, b, c]| ray_triangle(origin, dir, *a, *b, *c))
            .filter(|(t, _)| *t <= max_dist)
            .min_by(|x, y| x.0.total_cmp(&y.0))
    }
}

/// Collision geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    /// Sphere centered on the transform.
    Sphere {
        /// Radius.
        radius: f32,
    },
    /// Shared triangle mesh, posed by the transform.
    Mesh(Arc<CollisionMesh>),
}

/// Collider with response flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    /// Geometry.
    pub shape: ColliderShape,
    /// Record contacts but skip the physical response.
    pub trigger: bool,
    /// Use a swept test when this body is the faster one of a pair.
    pub raycast: bool,
    /// Never moved by a response.
    pub is_static: bool,
}

impl Default for Collider {
    fn default() -> Self {
        Self::sphere(1.0)
    }
}

impl Collider {
    /// Solid sphere.
    pub fn sphere(radius: f32) -> Self {
        Self {
            shape: ColliderShape::Sphere { radius: radius.max(0.0) },
            trigger: false,
            raycast: false,
            is_static: false,
        }
    }

    /// Static mesh.
    pub fn mesh(mesh: Arc<CollisionMesh>) -> Self {
        Self {
            shape: ColliderShape::Mesh(mesh),
            trigger: false,
            raycast: false,
            is_static: true,
        }
    }

    /// Set the trigger flag.
    pub fn as_trigger(mut self) -> Self {
        self.trigger = true;
        self
    }

    /// Set the swept-test flag.
    pub fn with_raycast(mut self) -> Self {
        self.raycast = true;
        self
    }

    /// Radius of a sphere enclosing the shape.
    pub fn bounding_radius(&self) -> f32 {
        match &self.shape {
            ColliderShape::Sphere { radius } => *radius,
            ColliderShape::Mesh(mesh) => mesh.bounding_radius(),
        }
    }

    /// Sphere radius, `None` for meshes.
    pub fn sphere_radius(&self) -> Option<f32> {
        match &self.shape {
            ColliderShape::Sphere { radius } => Some(*radius),
            ColliderShape::Mesh(_) => None,
        }
    }
}

// =============================================================================
// OWNERSHIP, CONTROL, CONTACTS, LIFETIME
// =============================================================================

/// The entity that created this one (projectile → ship).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner(pub EntityId);

impl Default for Owner {
    fn default() -> Self {
        Owner(EntityId(u32::MAX))
    }
}

/// Marks an entity as driven by input.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pilot {
    /// Most recent input applied.
    pub last_input: Option<InputSnapshot>,
    /// Steps until the weapon can fire again.
    pub cooldown: u32,
}

impl Pilot {
    /// Sequence number of the last applied input, 0 before any.
    pub fn last_processed(&self) -> u32 {
        self.last_input.as_ref().map_or(0, |i| i.sequence_number)
    }
}

/// Entities this one is currently touching, with the frame last seen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Contacts {
    /// Other entity → frame index of the last observed contact.
    pub colliding: BTreeMap<EntityId, u64>,
}

impl Contacts {
    /// Whether `other` is in contact.
    pub fn is_colliding_with(&self, other: EntityId) -> bool {
        self.colliding.contains_key(&other)
    }
}

/// Remaining steps before despawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    /// Steps left.
    pub remaining_steps: u32,
}

// =============================================================================
// STORE
// =============================================================================

/// One sparse set per component type.
#[derive(Clone, Debug, Default)]
pub struct ComponentStore {
    transforms: SparseSet<Transform>,
    motions: SparseSet<RigidMotion>,
    colliders: SparseSet<Collider>,
    owners: SparseSet<Owner>,
    pilots: SparseSet<Pilot>,
    contacts: SparseSet<Contacts>,
    lifetimes: SparseSet<Lifetime>,
}

impl ComponentStore {
    /// Kinds attached to `id`, in tag order.
    pub fn kinds_of(&self, id: EntityId) -> Vec<ComponentKind> {
        let mut kinds = Vec::new();
        if self.transforms.contains(id) {
            kinds.push(ComponentKind::Transform);
        }
        if self.motions.contains(id) {
            kinds.push(ComponentKind::RigidMotion);
        }
        if self.colliders.contains(id) {
            kinds.push(ComponentKind::Collider);
        }
        if self.owners.contains(id) {
            kinds.push(ComponentKind::Owner);
        }
        if self.pilots.contains(id) {
            kinds.push(ComponentKind::Pilot);
        }
        if self.contacts.contains(id) {
            kinds.push(ComponentKind::Contacts);
        }
        if self.lifetimes.contains(id) {
            kinds.push(ComponentKind::Lifetime);
        }
        kinds
    }

    #[cfg(test)]
    pub(crate) fn sparse_pages(&self) -> usize {
        self.transforms.page_count()
            + self.motions.page_count()
            + self.colliders.page_count()
            + self.owners.page_count()
            + self.pilots.page_count()
            + self.contacts.page_count()
            + self.lifetimes.page_count()
    }

    /// Detach everything from `id`.
    pub fn remove_all(&mut self, id: EntityId) {
        self.transforms.remove(id);
        self.motions.remove(id);
        self.colliders.remove(id);
        self.owners.remove(id);
        self.pilots.remove(id);
        self.contacts.remove(id);
        self.lifetimes.remove(id);
    }
}

macro_rules! impl_component {
    ($ty:ty, $kind:ident, $field:ident) => {
        impl Component for $ty {
            const KIND: ComponentKind = ComponentKind::$kind;

            fn storage(store: &ComponentStore) -> &SparseSet<Self> {
                &store.$field
            }

            fn storage_mut(store: &mut ComponentStore) -> &mut SparseSet<Self> {
                &mut store.$field
            }
        }
    };
}

impl_component!(Transform, Transform, transforms);
impl_component!(RigidMotion, RigidMotion, motions);
impl_component!(Collider, Collider, colliders);
impl_component!(Owner, Owner, owners);
impl_component!(Pilot, Pilot, pilots);
impl_component!(Contacts, Contacts, contacts);
impl_component!(Lifetime, Lifetime, lifetimes);
