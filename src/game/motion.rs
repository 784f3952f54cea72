//! Motion Integration
//!
//! One fixed step for one body:
//!
//! ```text
//! settle ──► (snapshot previous pose, once per step) ──► thrust ──► move
//!        ──► damp ──► turn ──► contain
//! ```
//!
//! The same functions run on the server for authority and on the client for
//! prediction and replay, so both sides produce bit-identical results for
//! the same input sequence.

use crate::core::math::{
    damping_factor, small_angle_rotation, Aabb, LOCAL_FORWARD, LOCAL_RIGHT, LOCAL_UP,
};
use crate::game::components::{RigidMotion, Transform};
use crate::game::input::ControlIntent;

/// Rest check. Snaps slow bodies to zero velocity.
///
/// Returns `true` when the body is resting.
#[inline]
pub fn settle(motion: &mut RigidMotion, epsilon: f32) -> bool {
    if motion.velocity.length() < epsilon {
        motion.velocity = glam::Vec3::ZERO;
        motion.resting = true;
    } else {
        motion.resting = false;
    }
    motion.resting
}

/// Advance one body by `dt_ms`.
///
/// With `control`, thrust is added along the body's local axes and pitch and
/// yaw rates are taken from the input. Roll is accumulated, so spin persists
/// until damped.
pub fn integrate(
    transform: &mut Transform,
    motion: &mut RigidMotion,
    control: Option<&ControlIntent>,
    dt_ms: f32,
) {
    let dt_s = dt_ms / 1000.0;

    if let Some(intent) = control {
        let axes = intent.movement_axes();
        let right = transform.rotation * LOCAL_RIGHT;
        let up = transform.rotation * LOCAL_UP;
        let forward = transform.rotation * LOCAL_FORWARD;

        motion.velocity += right * (motion.acceleration * dt_s * axes.x);
        motion.velocity += up * (motion.acceleration * dt_s * axes.y);
        motion.velocity += forward * (motion.acceleration * dt_s * axes.z);

        let turn = motion.angular_acceleration;
        motion.angular_velocity.x = intent.pitch * turn;
        motion.angular_velocity.y = intent.yaw * turn;
        motion.angular_velocity.z += intent.roll * turn * dt_s;
    }

    transform.position += motion.velocity * dt_s;
    motion.velocity *= damping_factor(motion.damping, dt_ms);

    motion.angular_velocity *= damping_factor(motion.angular_damping, dt_ms);
    let delta = small_angle_rotation(motion.angular_velocity, dt_s);
    transform.rotation = (transform.rotation * delta).normalize();
}

/// Rest check followed by integration, without touching the previous pose.
///
/// Used for every input applied within a step and for replay.
#[inline]
pub fn apply_input(
    transform: &mut Transform,
    motion: &mut RigidMotion,
    control: Option<&ControlIntent>,
    dt_ms: f32,
    rest_epsilon: f32,
) {
    settle(motion, rest_epsilon);
    integrate(transform, motion, control, dt_ms);
}

/// Keep a body inside the world region.
///
/// A body past a face is put back on it and its velocity along that axis is
/// reflected if it still points outward. Returns `true` when the body was
/// outside.
pub fn contain(transform: &mut Transform, motion: &mut RigidMotion, bounds: &Aabb) -> bool {
    let clamped = transform.position.clamp(bounds.min, bounds.max);
    if clamped == transform.position {
        return false;
    }
    for axis in 0..3 {
        let outward = if transform.position[axis] > bounds.max[axis] {
            1.0
        } else if transform.position[axis] < bounds.min[axis] {
            -1.0
        } else {
            continue;
        };
        if motion.velocity[axis] * outward > 0.0 {
            motion.velocity[axis] = -motion.velocity[axis];
        }
    }
    transform.position = clamped;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::REST_EPSILON;
    use glam::{Quat, Vec3};

    const DT: f32 = 1000.0 / 60.0;

    fn step_body(t: &mut Transform, m: &mut RigidMotion, control: Option<&ControlIntent>) {
        t.snapshot_previous();
        apply_input(t, m, control, DT, REST_EPSILON);
    }

    fn ship() -> (Transform, RigidMotion) {
        (
            Transform::default(),
            RigidMotion {
                acceleration: 10.0,
                angular_acceleration: 2.0,
                damping: 0.5,
                angular_damping: 0.5,
                ..RigidMotion::default()
            },
        )
    }

    #[test]
    fn test_forward_thrust_moves_along_negative_z() {
        let (mut t, mut m) = ship();
        let intent = ControlIntent::moving(0, 0, 1);
        for _ in 0..10 {
            step_body(&mut t, &mut m, Some(&intent));
        }
        assert!(t.position.z < 0.0);
        assert!(t.position.x.abs() < 1e-6);
        assert!(m.velocity.z < 0.0);
    }

    #[test]
    fn test_rest_check_snaps_velocity() {
        let mut m = RigidMotion::drifting(Vec3::new(5e-5, 0.0, 0.0), 1.0);
        assert!(settle(&mut m, REST_EPSILON));
        assert_eq!(m.velocity, Vec3::ZERO);

        m.velocity = Vec3::X;
        assert!(!settle(&mut m, REST_EPSILON));
    }

    #[test]
    fn test_previous_pose_captured_before_integration() {
        let mut t = Transform::default();
        let mut m = RigidMotion::drifting(Vec3::new(60.0, 0.0, 0.0), 1.0);
        step_body(&mut t, &mut m, None);

        assert_eq!(t.previous_position, Vec3::ZERO);
        assert!((t.position.x - 1.0).abs() < 1e-4);
        assert!((t.render_pose(0.5).position.x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_damping_decays_velocity() {
        let mut t = Transform::default();
        let mut m = RigidMotion::drifting(Vec3::new(10.0, 0.0, 0.0), 0.5);
        for _ in 0..60 {
            step_body(&mut t, &mut m, None);
        }
        assert!((m.velocity.x - 5.0).abs() < 1e-2, "{}", m.velocity.x);
    }

    #[test]
    fn test_roll_persists_pitch_does_not() {
        let (mut t, mut m) = ship();
        let turning = ControlIntent {
            roll: 1.0,
            pitch: 1.0,
            ..ControlIntent::default()
        };
        for _ in 0..30 {
            step_body(&mut t, &mut m, Some(&turning));
        }
        let spin = m.angular_velocity.z;
        assert!(spin > 0.0);
        assert!(m.angular_velocity.x > 0.0);

        let idle = ControlIntent::default();
        step_body(&mut t, &mut m, Some(&idle));
        assert_eq!(m.angular_velocity.x, 0.0);
        assert!(m.angular_velocity.z > 0.0);
        assert!(m.angular_velocity.z < spin);
        assert!((t.rotation.length() - 1.0).abs() < 1e-5);
        assert!(!t.rotation.abs_diff_eq(Quat::IDENTITY, 1e-3));
    }

    #[test]
    fn test_contain_reflects_at_face() {
        let bounds = Aabb::cube(Vec3::ZERO, 10.0);
        let mut t = Transform::at(Vec3::new(10.5, 3.0, -12.0), Quat::IDENTITY);
        let mut m = RigidMotion::drifting(Vec3::new(4.0, 1.0, 2.0), 1.0);

        assert!(contain(&mut t, &mut m, &bounds));
        assert_eq!(t.position, Vec3::new(10.0, 3.0, -10.0));
        // x pointed out and flips; z already points back in.
        assert_eq!(m.velocity, Vec3::new(-4.0, 1.0, 2.0));

        assert!(!contain(&mut t, &mut m, &bounds));
    }

    #[test]
    fn test_integration_is_deterministic() {
        let run = || {
            let (mut t, mut m) = ship();
            let intent = ControlIntent {
                movement: [1, 0, 1],
                yaw: 0.3,
                boost: true,
                ..ControlIntent::default()
            };
            for _ in 0..120 {
                step_body(&mut t, &mut m, Some(&intent));
            }
            (t, m)
        };
        assert_eq!(run(), run());
    }
}
