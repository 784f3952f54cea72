//! Client-Side Prediction
//!
//! Every captured input is applied to the local body immediately and kept
//! until the server acknowledges it. When a snapshot arrives the local body
//! is overwritten with the authoritative state and the unacknowledged inputs
//! are replayed on top:
//!
//! ```text
//! local = authoritative(k) + replay(pending k+1..k+m)
//! ```

use std::collections::VecDeque;

use glam::{Quat, Vec3};
use tracing::debug;

use crate::config::{ShipTuning, SimConfig};
use crate::core::math::{Aabb, Pose};
use crate::game::components::{RigidMotion, Transform};
use crate::game::input::{ControlIntent, InputSnapshot};
use crate::game::motion::{apply_input, contain};

/// Authoritative values for the local entity carried by a snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuthoritativeState {
    /// Last input sequence the server applied.
    pub last_processed_input: u32,
    /// Position after that input.
    pub position: Vec3,
    /// Orientation after that input.
    pub rotation: Quat,
    /// Linear velocity after that input.
    pub velocity: Vec3,
    /// Angular velocity after that input.
    pub angular_velocity: Vec3,
}

/// The locally simulated body.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocalBody {
    /// Pose.
    pub transform: Transform,
    /// Motion state.
    pub motion: RigidMotion,
}

impl LocalBody {
    /// Body with the given ship handling, at rest.
    pub fn ship(position: Vec3, rotation: Quat, tuning: &ShipTuning) -> Self {
        Self {
            transform: Transform::at(position, rotation),
            motion: RigidMotion {
                acceleration: tuning.acceleration,
                angular_acceleration: tuning.angular_acceleration,
                damping: tuning.damping,
                angular_damping: tuning.angular_damping,
                ..RigidMotion::default()
            },
        }
    }
}

/// Pending-input queue plus the speculative local body.
#[derive(Clone, Debug)]
pub struct Predictor {
    next_sequence: u32,
    pending: VecDeque<InputSnapshot>,
    body: Option<LocalBody>,
    step_ms: f32,
    max_pending: usize,
    rest_epsilon: f32,
    bounds: Aabb,
}

impl Predictor {
    /// Predictor stepping at the configured rate.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            next_sequence: 1,
            pending: VecDeque::new(),
            body: None,
            step_ms: config.step_ms() as f32,
            max_pending: config.max_pending_inputs.max(1),
            rest_epsilon: config.rest_epsilon,
            bounds: config.world_bounds(),
        }
    }

    /// Override the step size (from the server's welcome).
    pub fn set_step_ms(&mut self, step_ms: f32) {
        self.step_ms = step_ms;
    }

    /// Start controlling a body.
    pub fn attach(&mut self, body: LocalBody) {
        self.body = Some(body);
    }

    /// Stop controlling the body and forget unacknowledged inputs.
    pub fn detach(&mut self) {
        self.body = None;
        self.pending.clear();
    }

    /// Whether a local body exists.
    pub fn is_alive(&self) -> bool {
        self.body.is_some()
    }

    /// The local body.
    pub fn body(&self) -> Option<&LocalBody> {
        self.body.as_ref()
    }

    /// Inputs not yet acknowledged, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &InputSnapshot> {
        self.pending.iter()
    }

    /// Number of unacknowledged inputs.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Stamp an intent with the next sequence number and queue it.
    ///
    /// Returns `None` once the queue is full. The input is then neither
    /// queued nor sent, and no sequence number is used up, so every input
    /// the server can still apply stays available for replay.
    pub fn capture(&mut self, intent: ControlIntent) -> Option<InputSnapshot> {
        if self.pending.len() >= self.max_pending {
            debug!(pending = self.pending.len(), "pending inputs full, holding");
            return None;
        }
        let snapshot = InputSnapshot::new(intent, self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        self.pending.push_back(snapshot);
        Some(snapshot)
    }

    /// Apply an input to the local body for one fixed step.
    pub fn predict(&mut self, input: &InputSnapshot) {
        let (step_ms, eps) = (self.step_ms, self.rest_epsilon);
        if let Some(body) = self.body.as_mut() {
            body.transform.snapshot_previous();
            apply_input(&mut body.transform, &mut body.motion, Some(&input.intent), step_ms, eps);
            contain(&mut body.transform, &mut body.motion, &self.bounds);
        }
    }

    /// Capture and predict in one call.
    ///
    /// When nothing could be captured the body is held for the step, the
    /// same as the server does for a pilot with no input.
    pub fn capture_and_predict(&mut self, intent: ControlIntent) -> Option<InputSnapshot> {
        match self.capture(intent) {
            Some(snapshot) => {
                self.predict(&snapshot);
                Some(snapshot)
            }
            None => {
                if let Some(body) = self.body.as_mut() {
                    body.transform.snapshot_previous();
                }
                None
            }
        }
    }

    /// Correct the local body against authoritative state and replay what
    /// the server has not seen yet.
    ///
    /// Returns the number of inputs replayed.
    pub fn reconcile(&mut self, authority: &AuthoritativeState) -> usize {
        let acked = authority.last_processed_input;
        while self
            .pending
            .front()
            .is_some_and(|input| input.sequence_number <= acked)
        {
            self.pending.pop_front();
        }

        let (step_ms, eps) = (self.step_ms, self.rest_epsilon);
        let Some(body) = self.body.as_mut() else {
            return 0;
        };

        let before = body.transform.position;
        body.transform.teleport(authority.position, authority.rotation);
        body.motion.velocity = authority.velocity;
        body.motion.angular_velocity = authority.angular_velocity;

        for input in &self.pending {
            apply_input(&mut body.transform, &mut body.motion, Some(&input.intent), step_ms, eps);
            contain(&mut body.transform, &mut body.motion, &self.bounds);
        }

        // The correction is not interpolated: the render pose starts from here.
        body.transform.snapshot_previous();

        let error = before.distance(body.transform.position);
        if error > 0.01 {
            debug!(acked, replayed = self.pending.len(), error, "prediction corrected");
        }
        self.pending.len()
    }

    /// Interpolated pose of the local body.
    pub fn render_pose(&self, alpha: f32) -> Option<Pose> {
        self.body.as_ref().map(|b| b.transform.render_pose(alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> SimConfig {
        SimConfig::default()
    }

    fn predictor_with_body() -> Predictor {
        let cfg = config();
        let mut p = Predictor::new(&cfg);
        p.attach(LocalBody::ship(Vec3::ZERO, Quat::IDENTITY, &cfg.ship));
        p
    }

    fn intent(i: u32) -> ControlIntent {
        ControlIntent {
            movement: [(i % 3) as i8 - 1, 0, 1],
            yaw: 0.3,
            roll: if i % 2 == 0 { 0.5 } else { -0.2 },
            ..ControlIntent::default()
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut p = Predictor::new(&config());
        let a = p.capture(ControlIntent::default()).unwrap();
        let b = p.capture(ControlIntent::default()).unwrap();
        assert_eq!(a.sequence_number, 1);
        assert_eq!(b.sequence_number, 2);
        assert_eq!(p.pending_len(), 2);
    }

    #[test]
    fn test_prediction_moves_body() {
        let mut p = predictor_with_body();
        for _ in 0..10 {
            p.capture_and_predict(ControlIntent::moving(0, 0, 1));
        }
        let body = p.body().unwrap();
        assert!(body.transform.position.z < 0.0);
        assert_ne!(body.transform.position, body.transform.previous_position);
    }

    #[test]
    fn test_no_body_still_queues() {
        let mut p = Predictor::new(&config());
        p.capture_and_predict(ControlIntent::moving(0, 0, 1));
        assert!(!p.is_alive());
        assert_eq!(p.pending_len(), 1);
    }

    #[test]
    fn test_reconcile_drains_acknowledged() {
        let mut p = predictor_with_body();
        for i in 0..5 {
            p.capture_and_predict(intent(i));
        }
        let replayed = p.reconcile(&AuthoritativeState {
            last_processed_input: 3,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        });
        assert_eq!(replayed, 2);
        let seqs: Vec<u32> = p.pending().map(|i| i.sequence_number).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[test]
    fn test_full_queue_holds_body_and_keeps_oldest() {
        let mut cfg = config();
        cfg.max_pending_inputs = 3;
        let mut p = Predictor::new(&cfg);
        p.attach(LocalBody::ship(Vec3::ZERO, Quat::IDENTITY, &cfg.ship));

        for i in 0..3 {
            assert!(p.capture_and_predict(intent(i)).is_some());
        }
        let before = p.body().unwrap().transform.position;
        assert_eq!(p.capture_and_predict(intent(3)), None);
        assert_eq!(p.body().unwrap().transform.position, before);

        let seqs: Vec<u32> = p.pending().map(|i| i.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        // Once the server acknowledges, numbering resumes without a gap.
        p.reconcile(&AuthoritativeState {
            last_processed_input: 1,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        });
        assert_eq!(p.capture(intent(4)).map(|s| s.sequence_number), Some(4));
    }

    #[test]
    fn test_detach_clears_pending() {
        let mut p = predictor_with_body();
        p.capture_and_predict(intent(0));
        p.detach();
        assert!(!p.is_alive());
        assert_eq!(p.pending_len(), 0);
    }

    proptest! {
        /// Authoritative state after k inputs plus replay of k+1..k+m equals
        /// applying all k+m inputs directly.
        #[test]
        fn test_reconcile_matches_direct_application(k in 0usize..20, m in 0usize..20) {
            let cfg = config();
            let mut reference = LocalBody::ship(Vec3::ZERO, Quat::IDENTITY, &cfg.ship);
            let mut authority = None;
            let step = cfg.step_ms() as f32;

            let intents: Vec<ControlIntent> = (0..(k + m) as u32).map(intent).collect();
            for (i, it) in intents.iter().enumerate() {
                let snap = InputSnapshot::new(*it, i as u32 + 1);
                reference.transform.snapshot_previous();
                apply_input(&mut reference.transform, &mut reference.motion, Some(&snap.intent), step, cfg.rest_epsilon);
                contain(&mut reference.transform, &mut reference.motion, &cfg.world_bounds());
                if i + 1 == k {
                    authority = Some(reference);
                }
            }
            let base = authority.unwrap_or_else(|| LocalBody::ship(Vec3::ZERO, Quat::IDENTITY, &cfg.ship));

            let mut p = predictor_with_body();
            for it in &intents {
                p.capture_and_predict(*it);
            }
            // Disturb the speculative state so reconciliation has to correct it.
            if let Some(body) = p.body.as_mut() {
                body.transform.position += Vec3::splat(3.0);
            }

            let replayed = p.reconcile(&AuthoritativeState {
                last_processed_input: k as u32,
                position: base.transform.position,
                rotation: base.transform.rotation,
                velocity: base.motion.velocity,
                angular_velocity: base.motion.angular_velocity,
            });

            prop_assert_eq!(replayed, m);
            let seqs: Vec<u32> = p.pending().map(|i| i.sequence_number).collect();
            let expected: Vec<u32> = (k as u32 + 1..=(k + m) as u32).collect();
            prop_assert_eq!(seqs, expected);

            let body = p.body().unwrap();
            prop_assert_eq!(body.transform.position, reference.transform.position);
            prop_assert_eq!(body.transform.rotation, reference.transform.rotation);
            prop_assert_eq!(body.motion.velocity, reference.motion.velocity);
        }
    }
}
