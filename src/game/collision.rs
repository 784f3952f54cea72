//! Collision Detection and Response
//!
//! Narrow phase over candidates from the spatial index.
//!
//! - Only moving sphere bodies initiate tests, in ascending id order.
//! - Each unordered pair is resolved at most once per step.
//! - Pairs linked by ownership (projectile and firer, or two projectiles of
//!   the same firer) never collide.
//! - Sphere vs sphere: overlap, or a swept ray when the faster body carries
//!   the `raycast` flag. Contacts are mutual.
//! - Sphere vs mesh: ray from the previous position along the motion.
//!   Contacts are recorded for the moving body only.
//! - Response exchanges the normal velocity components (equal mass) while
//!   the pair is closing, then separates by the overlap. Static bodies
//!   reflect instead and take no share of the separation. Triggers skip the
//!   response entirely.

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::core::math::ray_sphere;
use crate::game::components::{Collider, ColliderShape, Owner, RigidMotion, Transform};
use crate::game::ecs::EntityId;
use crate::game::octree::SpatialIndex;
use crate::game::state::WorldState;

/// Movement below this length is treated as no movement for ray tests.
const MIN_TRAVEL: f32 = 1e-6;

/// Which narrow-phase test produced a contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactKind {
    /// Sphere overlap.
    Sphere,
    /// Swept ray against an inflated sphere.
    Swept,
    /// Ray against a triangle mesh.
    Mesh,
}

/// A contact found this step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Initiating (moving) entity.
    pub a: EntityId,
    /// Struck entity.
    pub b: EntityId,
    /// Unit normal pointing from `a` towards `b`.
    pub normal: Vec3,
    /// Overlap along the normal at detection time.
    pub depth: f32,
    /// Test that found it.
    pub kind: ContactKind,
    /// Either collider was a trigger.
    pub trigger: bool,
}

impl Contact {
    /// Whether both sides record the contact.
    pub fn is_mutual(&self) -> bool {
        self.kind != ContactKind::Mesh
    }
}

/// Working copy of one body's collision-relevant state.
struct Body {
    id: EntityId,
    transform: Transform,
    motion: Option<RigidMotion>,
    collider: Collider,
}

impl Body {
    fn load(state: &WorldState, id: EntityId) -> Option<Self> {
        Some(Self {
            id,
            transform: *state.get::<Transform>(id)?,
            motion: state.get::<RigidMotion>(id).copied(),
            collider: state.get::<Collider>(id)?.clone(),
        })
    }

    fn store(self, state: &mut WorldState) {
        if let Some(t) = state.get_mut::<Transform>(self.id) {
            *t = self.transform;
        }
        if let (Some(motion), Some(m)) = (self.motion, state.get_mut::<RigidMotion>(self.id)) {
            *m = motion;
        }
    }

    fn is_static(&self) -> bool {
        self.collider.is_static || self.motion.is_none()
    }

    fn velocity(&self) -> Vec3 {
        self.motion.map_or(Vec3::ZERO, |m| m.velocity)
    }

    fn add_velocity(&mut self, dv: Vec3) {
        if let Some(m) = self.motion.as_mut() {
            m.velocity += dv;
        }
    }

    fn travel(&self) -> Vec3 {
        self.transform.position - self.transform.previous_position
    }
}

/// Whether `a` and `b` are linked by ownership.
pub fn owned_together(state: &WorldState, a: EntityId, b: EntityId) -> bool {
    let owner_a = state.get::<Owner>(a).map(|o| o.0);
    let owner_b = state.get::<Owner>(b).map(|o| o.0);
    owner_a == Some(b) || owner_b == Some(a) || (owner_a.is_some() && owner_a == owner_b)
}

/// Resolve every contact for this step, mutating positions and velocities.
pub fn resolve_collisions(
    state: &mut WorldState,
    index: &SpatialIndex,
    config: &SimConfig,
) -> Vec<Contact> {
    let colliders = state.entities_with::<Collider>();
    let max_bound = colliders
        .iter()
        .filter_map(|id| state.get::<Collider>(*id))
        .map(Collider::bounding_radius)
        .fold(0.0, f32::max);

    let mut processed = BTreeSet::new();
    let mut contacts = Vec::new();

    for a_id in colliders {
        let Some(a) = Body::load(state, a_id) else {
            continue;
        };
        let Some(radius_a) = a.collider.sphere_radius() else {
            continue;
        };
        if a.is_static() || a.motion.map_or(true, |m| m.resting) {
            continue;
        }

        let scan = radius_a + max_bound + a.travel().length() + config.scan_margin;
        for b_id in index.query(a.transform.position, scan) {
            if b_id == a_id || owned_together(state, a_id, b_id) {
                continue;
            }
            let pair = if a_id < b_id { (a_id, b_id) } else { (b_id, a_id) };
            if processed.contains(&pair) {
                continue;
            }

            // Reload: earlier responses this step may have moved either body.
            let (Some(mut a), Some(mut b)) = (Body::load(state, a_id), Body::load(state, b_id)) else {
                continue;
            };
            if b.collider.bounding_radius() <= 0.0 {
                continue;
            }

            let found = match b.collider.sphere_radius() {
                Some(radius_b) => sphere_test(&mut a, radius_a, &mut b, radius_b),
                None => mesh_test(&a, radius_a, &b),
            };
            let Some((normal, depth, kind)) = found else {
                continue;
            };

            processed.insert(pair);
            let trigger = a.collider.trigger || b.collider.trigger;
            if !trigger {
                respond(&mut a, &mut b, normal, depth);
                a.store(state);
                b.store(state);
            }

            contacts.push(Contact {
                a: a_id,
                b: b_id,
                normal,
                depth,
                kind,
                trigger,
            });
        }
    }

    contacts
}

/// Overlap test, falling back to a swept test for flagged fast bodies.
///
/// A swept hit moves the faster body back to the point of first touch.
fn sphere_test(a: &mut Body, radius_a: f32, b: &mut Body, radius_b: f32) -> Option<(Vec3, f32, ContactKind)> {
    let reach = radius_a + radius_b;
    let offset = b.transform.position - a.transform.position;
    let distance = offset.length();
    if distance < reach {
        let normal = if distance > MIN_TRAVEL { offset / distance } else { Vec3::X };
        return Some((normal, reach - distance, ContactKind::Sphere));
    }

    let a_faster = a.velocity().length_squared() >= b.velocity().length_squared();
    let (fast, slow) = if a_faster { (a, b) } else { (b, a) };
    if !fast.collider.raycast {
        return None;
    }

    let travel = fast.travel();
    let length = travel.length();
    if length < MIN_TRAVEL {
        return None;
    }
    let dir = travel / length;
    let origin = fast.transform.previous_position;
    let t = ray_sphere(origin, dir, length, slow.transform.position, reach).filter(|t| *t > 0.0)?;

    fast.transform.position = origin + dir * t;
    let fast_to_slow = (slow.transform.position - fast.transform.position).normalize_or_zero();
    let normal = if a_faster { fast_to_slow } else { -fast_to_slow };
    Some((normal, 0.0, ContactKind::Swept))
}

/// Ray from `a`'s previous position along its motion against `b`'s mesh.
fn mesh_test(a: &Body, radius_a: f32, b: &Body) -> Option<(Vec3, f32, ContactKind)> {
    let ColliderShape::Mesh(mesh) = &b.collider.shape else {
        return None;
    };
    let travel = a.travel();
    let length = travel.length();
    if length < MIN_TRAVEL {
        return None;
    }
    let dir = travel / length;
    let reach = length + radius_a;

    let to_local = b.transform.rotation.inverse();
    let origin = to_local * (a.transform.previous_position - b.transform.position);
    let (t, local_normal) = mesh.raycast(origin, to_local * dir, reach)?;

    let face = (b.transform.rotation * local_normal).normalize_or_zero();
    let normal = if face.dot(dir) < 0.0 { -face } else { face };
    let depth = (reach - t) * normal.dot(dir).abs();
    Some((normal, depth, ContactKind::Mesh))
}

/// Elastic equal-mass exchange along `normal` (a → b) plus separation.
fn respond(a: &mut Body, b: &mut Body, normal: Vec3, depth: f32) {
    let a_static = a.is_static();
    let b_static = b.is_static();
    if a_static && b_static {
        return;
    }

    let va = a.velocity().dot(normal);
    let vb = b.velocity().dot(normal);
    if va - vb > 0.0 {
        if b_static {
            a.add_velocity(normal * (-2.0 * va));
        } else if a_static {
            b.add_velocity(normal * (-2.0 * vb));
        } else {
            a.add_velocity(normal * (vb - va));
            b.add_velocity(normal * (va - vb));
        }
    }

    if depth > 0.0 {
        if b_static {
            a.transform.position -= normal * depth;
        } else if a_static {
            b.transform.position += normal * depth;
        } else {
            a.transform.position -= normal * (depth * 0.5);
            b.transform.position += normal * (depth * 0.5);
        }
    }
}
