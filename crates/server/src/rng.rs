//! Seedable randomness for game rooms.

use protocol::Direction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random source backing a game room.
///
/// Wraps a seeded generator so tests can fix the seed and replay the exact
/// sequence of tile and direction draws.
#[derive(Debug)]
pub struct GameRng {
    rng: StdRng,
    seed: u64,
}

impl GameRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn from_random() -> Self {
        let seed: u64 = rand::rng().random();
        Self::new(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform integer in `[0, bound)`.
    pub fn below(&mut self, bound: i32) -> i32 {
        self.rng.random_range(0..bound)
    }

    /// Uniformly drawn direction.
    pub fn direction(&mut self) -> Direction {
        Direction::ALL[self.rng.random_range(0..Direction::ALL.len())]
    }
}
