//! Input Capture and Sanitation
//!
//! `ControlIntent` is the abstract "current input state" a device layer
//! delivers. Stamped with a per-connection sequence number it becomes an
//! `InputSnapshot`, the unit that is predicted, sent, queued and replayed.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

// =============================================================================
// INPUT TYPES
// =============================================================================

/// Control state for one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlIntent {
    /// Strafe (x), vertical (y), forward/back (z): each -1, 0 or 1.
    pub movement: [i8; 3],
    /// Roll rate input, -1..=1.
    pub roll: f32,
    /// Yaw rate input, -1..=1.
    pub yaw: f32,
    /// Pitch rate input, -1..=1.
    pub pitch: f32,
    /// Doubles the movement axes.
    pub boost: bool,
    /// Fire the primary weapon.
    pub weapon_primary: bool,
}

impl ControlIntent {
    /// Intent with only movement set.
    pub fn moving(strafe: i8, vertical: i8, forward: i8) -> Self {
        Self {
            movement: [strafe, vertical, forward],
            ..Self::default()
        }
    }

    /// Clamp axes and zero out non-finite rates.
    pub fn sanitized(&self) -> Self {
        let rate = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            movement: self.movement.map(|axis| axis.signum()),
            roll: rate(self.roll),
            yaw: rate(self.yaw),
            pitch: rate(self.pitch),
            boost: self.boost,
            weapon_primary: self.weapon_primary,
        }
    }

    /// Movement axes as a vector, doubled while boosting.
    pub fn movement_axes(&self) -> Vec3 {
        let [x, y, z] = self.movement.map(|axis| axis.signum() as f32);
        let scale = if self.boost { 2.0 } else { 1.0 };
        Vec3::new(x, y, z) * scale
    }
}

/// A sequenced input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    /// Control state.
    pub intent: ControlIntent,
    /// Monotonic per connection, starting at 1.
    pub sequence_number: u32,
}

impl InputSnapshot {
    /// Stamp an intent.
    pub fn new(intent: ControlIntent, sequence_number: u32) -> Self {
        Self {
            intent: intent.sanitized(),
            sequence_number,
        }
    }
}

/// Collaborator delivering the current input state.
pub trait InputSource {
    /// Sample the device state for this step.
    fn current_input(&mut self) -> ControlIntent;
}

impl<F> InputSource for F
where
    F: FnMut() -> ControlIntent,
{
    fn current_input(&mut self) -> ControlIntent {
        self()
    }
}

// =============================================================================
// INPUT QUEUE (server side, per connection)
// =============================================================================

/// Outcome of offering an input to an [`InputQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputAcceptance {
    /// Queued for the next step.
    Queued,
    /// Sequence at or below the last processed one.
    Stale,
    /// Sequence already waiting in the queue.
    Duplicate,
    /// Backlog full.
    Overflow,
}

/// Reorder buffer keyed by sequence number.
///
/// Out-of-order arrivals ahead of the last processed sequence are held and
/// released in ascending order. Gaps are not waited for.
#[derive(Clone, Debug)]
pub struct InputQueue {
    pending: BTreeMap<u32, InputSnapshot>,
    last_processed: u32,
    capacity: usize,
}

impl InputQueue {
    /// Create with a backlog cap.
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_processed: 0,
            capacity: capacity.max(1),
        }
    }

    /// Offer an input.
    pub fn push(&mut self, input: InputSnapshot) -> InputAcceptance {
        let seq = input.sequence_number;
        if seq <= self.last_processed {
            return InputAcceptance::Stale;
        }
        if self.pending.contains_key(&seq) {
            return InputAcceptance::Duplicate;
        }
        if self.pending.len() >= self.capacity {
            return InputAcceptance::Overflow;
        }
        self.pending.insert(seq, InputSnapshot::new(input.intent, seq));
        InputAcceptance::Queued
    }

    /// Take every queued input in ascending order and mark them processed.
    pub fn drain_ready(&mut self) -> Vec<InputSnapshot> {
        let drained: Vec<_> = std::mem::take(&mut self.pending).into_values().collect();
        if let Some(last) = drained.last() {
            self.last_processed = last.sequence_number;
        }
        drained
    }

    /// Highest sequence handed out by [`drain_ready`](Self::drain_ready).
    pub fn last_processed(&self) -> u32 {
        self.last_processed
    }

    /// Number of inputs waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seq: u32) -> InputSnapshot {
        InputSnapshot::new(ControlIntent::moving(0, 0, 1), seq)
    }

    #[test]
    fn test_sanitize_clamps() {
        let raw = ControlIntent {
            movement: [5, -3, 0],
            roll: f32::NAN,
            yaw: 4.0,
            pitch: -0.5,
            ..ControlIntent::default()
        };
        let clean = raw.sanitized();
        assert_eq!(clean.movement, [1, -1, 0]);
        assert_eq!(clean.roll, 0.0);
        assert_eq!(clean.yaw, 1.0);
        assert_eq!(clean.pitch, -0.5);
    }

    #[test]
    fn test_boost_doubles_axes() {
        let mut intent = ControlIntent::moving(1, 0, -1);
        assert_eq!(intent.movement_axes(), Vec3::new(1.0, 0.0, -1.0));
        intent.boost = true;
        assert_eq!(intent.movement_axes(), Vec3::new(2.0, 0.0, -2.0));
    }

    #[test]
    fn test_queue_reorders() {
        let mut queue = InputQueue::new(16);
        assert_eq!(queue.push(input(3)), InputAcceptance::Queued);
        assert_eq!(queue.push(input(1)), InputAcceptance::Queued);
        assert_eq!(queue.push(input(2)), InputAcceptance::Queued);

        let seqs: Vec<u32> = queue.drain_ready().iter().map(|i| i.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(queue.last_processed(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_rejects_stale_and_duplicate() {
        let mut queue = InputQueue::new(16);
        queue.push(input(5));
        assert_eq!(queue.push(input(5)), InputAcceptance::Duplicate);
        queue.drain_ready();

        assert_eq!(queue.push(input(5)), InputAcceptance::Stale);
        assert_eq!(queue.push(input(2)), InputAcceptance::Stale);
        assert_eq!(queue.push(input(6)), InputAcceptance::Queued);
    }

    #[test]
    fn test_queue_overflow_drops_newest() {
        let mut queue = InputQueue::new(2);
        queue.push(input(1));
        queue.push(input(2));
        assert_eq!(queue.push(input(3)), InputAcceptance::Overflow);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_closure_is_input_source() {
        let mut source = || ControlIntent::moving(0, 1, 0);
        assert_eq!(source.current_input().movement, [0, 1, 0]);
    }
}
