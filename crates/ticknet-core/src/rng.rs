//! Deterministic random number generator
//!
//! xorshift64, so a seed produces the same sequence on every platform. Used
//! where the netcode needs reproducible randomness, such as simulated packet
//! loss in tests and demos.

use serde::{Deserialize, Serialize};

/// A deterministic random number generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRng {
    state: u64,
}

impl GameRng {
    /// Create a new RNG with the given seed
    pub fn new(seed: u64) -> Self {
        // xorshift is stuck at zero forever
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate the next raw u64 value
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Generate a random f64 in range [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a random bool with given probability of true
    pub fn chance(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.next_f64() < probability
    }
}

impl Default for GameRng {
    fn default() -> Self {
        Self::new(0x5EED_CAFE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut a = GameRng::new(12345);
        let mut b = GameRng::new(12345);

        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_zero_seed() {
        let mut rng = GameRng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_chance_bounds() {
        let mut rng = GameRng::new(7);
        for _ in 0..1000 {
            assert!(!rng.chance(0.0));
            assert!(rng.chance(1.0));
        }
        let f = rng.next_f64();
        assert!((0.0..1.0).contains(&f));
    }
}
