//! World State Hashing
//!
//! SHA-256 digests over the authoritative world, used to:
//! - compare client and server views of a snapshot
//! - check that two replays of the same input log agree
//!
//! Floats are hashed by their IEEE-754 bit patterns, so two hashes only match
//! when the simulations are bit-identical.

use glam::{Quat, Vec3};
use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain separator for world snapshots.
const WORLD_DOMAIN: &[u8] = b"STARWAKE_WORLD_V1";

/// Incremental hasher with typed update helpers.
///
/// Update order is part of the hash; callers iterate entities in id order.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for a world snapshot.
    pub fn for_world_state() -> Self {
        Self::new(WORLD_DOMAIN)
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f32 bit pattern (little-endian).
    #[inline]
    pub fn update_f32(&mut self, value: f32) {
        self.hasher.update(value.to_bits().to_le_bytes());
    }

    /// Update with a vector, x then y then z.
    #[inline]
    pub fn update_vec3(&mut self, value: Vec3) {
        self.update_f32(value.x);
        self.update_f32(value.y);
        self.update_f32(value.z);
    }

    /// Update with a quaternion, x y z w.
    #[inline]
    pub fn update_quat(&mut self, value: Quat) {
        self.update_f32(value.x);
        self.update_f32(value.y);
        self.update_f32(value.z);
        self.update_f32(value.w);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Hash a world snapshot.
///
/// The frame number and seed go first, then whatever `add_state` writes.
pub fn compute_state_hash<F>(frame: u64, seed: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_world_state();
    hasher.update_u64(frame);
    hasher.update_u64(seed);
    add_state(&mut hasher);
    hasher.finalize()
}

/// Short hex prefix of a hash for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}
