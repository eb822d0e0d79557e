//! Upload-rate ranking policy.

use super::{sort_by_score, Policy};
use crate::catalog::MinedTorrent;

/// Ranks torrents by observed upload throughput (`bytes_up` per second
/// since their handle attached), descending.
///
/// Torrents without a handle, or with no elapsed engine time yet, score
/// 0 and sink to the back.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadRatePolicy;

impl Policy for UploadRatePolicy {
    fn name(&self) -> &'static str {
        "upload_rate"
    }

    fn sort<'a>(&self, torrents: &[&'a MinedTorrent]) -> Vec<&'a MinedTorrent> {
        sort_by_score(torrents, MinedTorrent::upload_rate)
    }
}
