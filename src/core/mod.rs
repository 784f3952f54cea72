//! Core primitives.
//!
//! Timing, math, hashing and seeded randomness shared by the server
//! simulation and the client prediction loop.

pub mod hash;
pub mod math;
pub mod rng;
pub mod scheduler;

// Re-export core types
pub use hash::{compute_state_hash, StateHash, StateHasher};
pub use math::{Aabb, Pose, REST_EPSILON};
pub use rng::DeterministicRng;
pub use scheduler::{clamp_frame_delta, FixedStepScheduler, DEFAULT_MAX_FRAME_MS};
