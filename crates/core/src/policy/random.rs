//! Random ranking policy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Policy;
use crate::catalog::MinedTorrent;

/// Ranks torrents in a seeded Fisher-Yates shuffle order.
///
/// The seed is fixed at construction, so one instance always shuffles
/// the same input the same way; tests inject a seed with `with_seed`.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    seed: u64,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            seed: rand::random(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn sort<'a>(&self, torrents: &[&'a MinedTorrent]) -> Vec<&'a MinedTorrent> {
        let mut shuffled = torrents.to_vec();
        let mut rng = StdRng::seed_from_u64(self.seed);
        for i in (1..shuffled.len()).rev() {
            let j = rng.random_range(0..=i);
            shuffled.swap(i, j);
        }
        shuffled
    }
}
