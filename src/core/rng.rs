//! Seeded Random Source
//!
//! Xorshift-family generator seeded through SplitMix64. Used for spawn
//! placement so that a replay with the same seed lays out the same world.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::math::Aabb;

/// Deterministic 128-bit state PRNG.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a generator from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let a = splitmix64(&mut s);
        let b = splitmix64(&mut s);
        let state = if a == 0 && b == 0 { [1, 1] } else { [a, b] };
        Self { state }
    }

    /// Next raw 64-bit value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Uniform float in `[0, 1)` built from the top 24 bits.
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform float in `[min, max)`.
    #[inline]
    pub fn next_f32_range(&mut self, min: f32, max: f32) -> f32 {
        if min >= max {
            return min;
        }
        min + (max - min) * self.next_f32()
    }

    /// Uniform point inside `bounds`.
    pub fn point_in(&mut self, bounds: &Aabb) -> Vec3 {
        Vec3::new(
            self.next_f32_range(bounds.min.x, bounds.max.x),
            self.next_f32_range(bounds.min.y, bounds.max.y),
            self.next_f32_range(bounds.min.z, bounds.max.z),
        )
    }
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut a = DeterministicRng::new(12345);
        let mut b = DeterministicRng::new(12345);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut a = DeterministicRng::new(1);
        let mut b = DeterministicRng::new(2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_next_f32_range() {
        let mut rng = DeterministicRng::new(99);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
        assert_eq!(rng.next_f32_range(3.0, 3.0), 3.0);
    }

    #[test]
    fn test_point_in_bounds() {
        let bounds = Aabb::cube(Vec3::new(10.0, 0.0, -5.0), 50.0);
        let mut rng = DeterministicRng::new(7777);
        for _ in 0..200 {
            assert!(bounds.contains(rng.point_in(&bounds)));
        }
    }
}
