//! Fixed-Step Scheduler
//!
//! Converts variable wall-clock deltas into a deterministic sequence of
//! fixed-size simulation steps.
//!
//! ```text
//!  elapsed ──► lag += elapsed ──► while lag >= step { step(step); lag -= step }
//!                                   │
//!                                   └──► alpha = lag / step   (render fraction)
//! ```
//!
//! The scheduler never clamps `elapsed` itself. Callers bound it with
//! [`clamp_frame_delta`] so a stalled process cannot queue an unbounded
//! number of catch-up steps.

/// Default upper bound for a single frame delta (milliseconds).
pub const DEFAULT_MAX_FRAME_MS: f64 = 250.0;

/// Clamp a raw wall-clock delta before feeding it to the scheduler.
///
/// Negative and non-finite deltas become zero.
#[inline]
pub fn clamp_frame_delta(elapsed_ms: f64, max_frame_ms: f64) -> f64 {
    if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 {
        return 0.0;
    }
    elapsed_ms.min(max_frame_ms.max(0.0))
}

/// Accumulator that runs a step callback at a fixed rate.
///
/// The callback is passed to [`advance`](Self::advance) by value and runs
/// while the scheduler is mutably borrowed, so it cannot re-enter `advance`
/// on the same scheduler.
#[derive(Clone, Debug)]
pub struct FixedStepScheduler {
    step_ms: f64,
    lag_ms: f64,
    steps_run: u64,
}

impl FixedStepScheduler {
    /// Create a scheduler with the given step size in milliseconds.
    pub fn new(step_ms: f64) -> Self {
        debug_assert!(step_ms > 0.0, "step size must be positive");
        Self {
            step_ms: if step_ms.is_finite() && step_ms > 0.0 { step_ms } else { 1.0 },
            lag_ms: 0.0,
            steps_run: 0,
        }
    }

    /// Create a scheduler stepping at `rate_hz` steps per second.
    pub fn from_rate(rate_hz: u32) -> Self {
        Self::new(1000.0 / rate_hz.max(1) as f64)
    }

    /// Accumulate `elapsed_ms` and run `step` once per whole step of lag.
    ///
    /// Returns the leftover fraction of a step in `[0, 1)`, used as the
    /// render interpolation alpha.
    pub fn advance<F>(&mut self, elapsed_ms: f64, mut step: F) -> f64
    where
        F: FnMut(f64),
    {
        if elapsed_ms.is_finite() && elapsed_ms > 0.0 {
            self.lag_ms += elapsed_ms;
        }

        while self.lag_ms >= self.step_ms {
            step(self.step_ms);
            self.lag_ms -= self.step_ms;
            self.steps_run += 1;
        }

        self.alpha()
    }

    /// Current leftover fraction without advancing.
    #[inline]
    pub fn alpha(&self) -> f64 {
        (self.lag_ms / self.step_ms).clamp(0.0, 1.0 - f64::EPSILON)
    }

    /// Step size in milliseconds.
    #[inline]
    pub fn step_ms(&self) -> f64 {
        self.step_ms
    }

    /// Accumulated, not yet simulated time in milliseconds.
    #[inline]
    pub fn lag_ms(&self) -> f64 {
        self.lag_ms
    }

    /// Total number of steps executed since creation.
    #[inline]
    pub fn steps_run(&self) -> u64 {
        self.steps_run
    }

    /// Drop any accumulated lag (used after a reconnect or a long pause).
    pub fn reset(&mut self) {
        self.lag_ms = 0.0;
    }
}
