//! Geometry and Integration Helpers
//!
//! Small, allocation-free helpers shared by the integrator, the octree and
//! the collision resolver. Everything here is `f32` on top of `glam`.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Speeds below this are snapped to zero and the body is considered resting.
pub const REST_EPSILON: f32 = 1e-4;

/// Local forward axis (bodies look down -Z).
pub const LOCAL_FORWARD: Vec3 = Vec3::NEG_Z;

/// Local right axis.
pub const LOCAL_RIGHT: Vec3 = Vec3::X;

/// Local up axis.
pub const LOCAL_UP: Vec3 = Vec3::Y;

/// Per-step multiplier for a decay factor expressed per second.
///
/// `value *= damping_factor(d, dt)` applied over many small steps matches a
/// single step of the summed duration.
#[inline]
pub fn damping_factor(damping: f32, dt_ms: f32) -> f32 {
    damping.max(0.0).powf(dt_ms / 1000.0)
}

/// Incremental rotation from an angular velocity over `dt_s` seconds.
///
/// The scaled components are used directly as the quaternion's vector part
/// with a unit scalar part, then normalized.
#[inline]
pub fn small_angle_rotation(angular_velocity: Vec3, dt_s: f32) -> Quat {
    let v = angular_velocity * dt_s;
    Quat::from_xyzw(v.x, v.y, v.z, 1.0).normalize()
}

/// A position plus orientation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// World position.
    pub position: Vec3,
    /// World orientation (unit quaternion).
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    /// Create a pose.
    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Blend from `from` (alpha = 0) to `to` (alpha = 1).
    ///
    /// Position is linear, rotation is spherical.
    pub fn interpolate(from: Pose, to: Pose, alpha: f32) -> Pose {
        let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 1.0 };
        Pose {
            position: to.position * alpha + from.position * (1.0 - alpha),
            rotation: from.rotation.slerp(to.rotation, alpha).normalize(),
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Create from corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Cube centered on `center` with the given half extent.
    pub fn cube(center: Vec3, half_extent: f32) -> Self {
        let h = Vec3::splat(half_extent.abs());
        Self::new(center - h, center + h)
    }

    /// Center point.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Inclusive containment test.
    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Closest point inside the box to `p`.
    #[inline]
    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }

    /// Distance from `p` to the box (zero when inside).
    #[inline]
    pub fn distance_to(&self, p: Vec3) -> f32 {
        self.closest_point(p).distance(p)
    }

    /// One of the eight octants split at the center.
    ///
    /// Bit 0 selects the upper x half, bit 1 upper y, bit 2 upper z.
    pub fn octant(&self, index: usize) -> Aabb {
        let c = self.center();
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if index & bit != 0 {
                (mid, hi)
            } else {
                (lo, mid)
            }
        };
        let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
        Aabb {
            min: Vec3::new(x0, y0, z0),
            max: Vec3::new(x1, y1, z1),
        }
    }
}

/// Distance along a ray to the first intersection with a sphere.
///
/// `dir` must be normalized. Returns `None` when the sphere is missed or the
/// hit lies beyond `max_dist`. A ray starting inside the sphere hits at 0.
pub fn ray_sphere(origin: Vec3, dir: Vec3, max_dist: f32, center: Vec3, radius: f32) -> Option<f32> {
    let m = origin - center;
    let c = m.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let b = m.dot(dir);
    if b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    if t <= max_dist {
        Some(t.max(0.0))
    } else {
        None
    }
}

/// Two-sided ray/triangle intersection (Möller-Trumbore).
///
/// Returns the hit distance and the unnormalized face normal.
pub fn ray_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, Vec3)> {
    const EPS: f32 = 1e-7;
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t < 0.0 {
        return None;
    }
    Some((t, e1.cross(e2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damping_is_step_size_invariant() {
        let damping = 0.3;
        let total_ms = 100.0;

        let mut one = 10.0f32;
        one *= damping_factor(damping, total_ms);

        let mut many = 10.0f32;
        for _ in 0..10 {
            many *= damping_factor(damping, total_ms / 10.0);
        }

        assert!((one - many).abs() < 1e-4, "{} vs {}", one, many);
    }

    #[test]
    fn test_damping_of_one_is_identity() {
        assert_eq!(damping_factor(1.0, 16.0), 1.0);
    }

    #[test]
    fn test_small_angle_rotation_is_unit() {
        let q = small_angle_rotation(Vec3::new(1.0, 2.0, -3.0), 0.016);
        assert!((q.length() - 1.0).abs() < 1e-5);

        let identity = small_angle_rotation(Vec3::ZERO, 0.016);
        assert!(identity.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_pose_interpolate_endpoints() {
        let a = Pose::new(Vec3::ZERO, Quat::IDENTITY);
        let b = Pose::new(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(1.0));

        let start = Pose::interpolate(a, b, 0.0);
        let end = Pose::interpolate(a, b, 1.0);
        let mid = Pose::interpolate(a, b, 0.5);

        assert!(start.position.abs_diff_eq(a.position, 1e-6));
        assert!(end.position.abs_diff_eq(b.position, 1e-5));
        assert!(mid.position.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));
        assert!(end.rotation.abs_diff_eq(b.rotation, 1e-5));
    }

    #[test]
    fn test_aabb_octants_cover_box() {
        let aabb = Aabb::cube(Vec3::ZERO, 4.0);
        let p = Vec3::new(1.0, -1.0, 3.0);
        let hits = (0..8).filter(|i| aabb.octant(*i).contains(p)).count();
        assert_eq!(hits, 1);
        assert_eq!(aabb.octant(0).max, Vec3::ZERO);
        assert_eq!(aabb.octant(7).min, Vec3::ZERO);
    }

    #[test]
    fn test_aabb_distance() {
        let aabb = Aabb::cube(Vec3::ZERO, 1.0);
        assert_eq!(aabb.distance_to(Vec3::ZERO), 0.0);
        assert!((aabb.distance_to(Vec3::new(3.0, 0.0, 0.0)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ray_sphere() {
        let hit = ray_sphere(Vec3::ZERO, Vec3::X, 10.0, Vec3::new(5.0, 0.0, 0.0), 1.0);
        assert!((hit.unwrap() - 4.0).abs() < 1e-5);

        let miss = ray_sphere(Vec3::ZERO, Vec3::X, 10.0, Vec3::new(5.0, 3.0, 0.0), 1.0);
        assert!(miss.is_none());

        let too_far = ray_sphere(Vec3::ZERO, Vec3::X, 2.0, Vec3::new(5.0, 0.0, 0.0), 1.0);
        assert!(too_far.is_none());

        let inside = ray_sphere(Vec3::ZERO, Vec3::X, 2.0, Vec3::ZERO, 1.0);
        assert_eq!(inside, Some(0.0));
    }

    #[test]
    fn test_ray_triangle() {
        let a = Vec3::new(-1.0, -1.0, 5.0);
        let b = Vec3::new(1.0, -1.0, 5.0);
        let c = Vec3::new(0.0, 1.0, 5.0);

        let (t, normal) = ray_triangle(Vec3::ZERO, Vec3::Z, a, b, c).unwrap();
        assert!((t - 5.0).abs() < 1e-5);
        assert!(normal.normalize().z.abs() > 0.99);

        assert!(ray_triangle(Vec3::ZERO, Vec3::NEG_Z, a, b, c).is_none());
        assert!(ray_triangle(Vec3::new(5.0, 0.0, 0.0), Vec3::Z, a, b, c).is_none());
    }
}
