//! Seeder-ratio ranking policy.

use super::{sort_by_score, Policy};
use crate::catalog::MinedTorrent;

/// Ranks torrents by `seeds / (seeds + peers + 1)`, descending.
///
/// Seed-heavy swarms are cheap to serve and likely to reward uploads;
/// torrents with no reported state score 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeederRatioPolicy;

impl Policy for SeederRatioPolicy {
    fn name(&self) -> &'static str {
        "seeder_ratio"
    }

    fn sort<'a>(&self, torrents: &[&'a MinedTorrent]) -> Vec<&'a MinedTorrent> {
        sort_by_score(torrents, MinedTorrent::seeder_ratio)
    }
}
