//! Ranking policies over mined torrents.
//!
//! A policy is a pure ranking function: given the currently loaded
//! mined torrents, it returns them in preferred running order. The
//! selector composes multiple policies by round-robin interleaving.

mod random;
mod seeder_ratio;
mod upload_rate;

pub use random::RandomPolicy;
pub use seeder_ratio::SeederRatioPolicy;
pub use upload_rate::UploadRatePolicy;

use std::sync::Arc;

use crate::catalog::MinedTorrent;

/// A pure ranking function over mined torrents.
///
/// `sort` must be deterministic for a given policy instance and input:
/// ties may be broken arbitrarily but consistently within one call. It
/// must not suspend or read a clock; every score comes from the entries
/// themselves.
pub trait Policy: Send + Sync {
    /// Policy name for logging.
    fn name(&self) -> &'static str;

    /// Return the input in preferred running order, best first.
    fn sort<'a>(&self, torrents: &[&'a MinedTorrent]) -> Vec<&'a MinedTorrent>;
}

/// The default policy mix: upload rate first, randomness for
/// exploration.
pub fn default_policies() -> Vec<Arc<dyn Policy>> {
    vec![Arc::new(UploadRatePolicy), Arc::new(RandomPolicy::new())]
}

/// Descending stable sort by a score function. Stability keeps tie
/// order consistent within a call.
fn sort_by_score<'a>(
    torrents: &[&'a MinedTorrent],
    score: impl Fn(&MinedTorrent) -> f64,
) -> Vec<&'a MinedTorrent> {
    let mut ranked = torrents.to_vec();
    ranked.sort_by(|a, b| score(b).total_cmp(&score(a)));
    ranked
}
