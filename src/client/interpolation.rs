//! Remote Entity Interpolation
//!
//! Remote entities are drawn slightly in the past, between the two received
//! samples that straddle the render time.

use std::collections::VecDeque;

use crate::core::math::Pose;

/// One received pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseSample {
    /// Local receive time (ms).
    pub received_at: f64,
    /// Pose at that time.
    pub pose: Pose,
}

/// Timestamped pose history for one remote entity.
///
/// Kept sorted by receive time. After sampling, at most one sample precedes
/// the render time.
#[derive(Clone, Debug, Default)]
pub struct RemoteStateBuffer {
    samples: VecDeque<PoseSample>,
}

impl RemoteStateBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pose received at `received_at`.
    pub fn push(&mut self, received_at: f64, pose: Pose) {
        let sample = PoseSample { received_at, pose };
        match self.samples.back() {
            Some(last) if last.received_at > received_at => {
                let at = self.samples.partition_point(|s| s.received_at <= received_at);
                self.samples.insert(at, sample);
            }
            _ => self.samples.push_back(sample),
        }
    }

    /// Drop samples older than the newest one at or before `render_time`.
    pub fn trim(&mut self, render_time: f64) {
        while self.samples.len() >= 2 && self.samples[1].received_at <= render_time {
            self.samples.pop_front();
        }
    }

    /// Pose at `render_time`, trimming the history as a side effect.
    ///
    /// Holds the newest pose when no pair of samples straddles the time.
    pub fn sample(&mut self, render_time: f64) -> Option<Pose> {
        self.trim(render_time);

        match (self.samples.front(), self.samples.get(1)) {
            (Some(from), Some(to)) if from.received_at <= render_time => {
                let span = to.received_at - from.received_at;
                let alpha = if span > 0.0 {
                    ((render_time - from.received_at) / span).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                Some(Pose::interpolate(from.pose, to.pose, alpha as f32))
            }
            _ => self.latest(),
        }
    }

    /// Newest received pose.
    pub fn latest(&self) -> Option<Pose> {
        self.samples.back().map(|s| s.pose)
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Buffered samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &PoseSample> {
        self.samples.iter()
    }
}
