//! Selection planning: which mined torrents should run next.
//!
//! `plan_selection` is pure and synchronous; the runner executes the
//! resulting plan against the engine.

use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::MinedTorrent;
use crate::engine::{InfoHash, StateSnapshot, TorrentStatus};
use crate::policy::Policy;

/// The reconciliation a selector tick decided on.
#[derive(Debug, Clone, Default)]
pub struct SelectionPlan {
    /// Stopped torrents to start.
    pub start: Vec<InfoHash>,
    /// Running torrents to stop.
    pub stop: Vec<InfoHash>,
    /// Running torrents in dead swarms (availability < 1) to drop from
    /// the catalog and remove from the engine with their content.
    pub evict: Vec<InfoHash>,
}

impl SelectionPlan {
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty() && self.evict.is_empty()
    }
}

/// Only actively transferring torrents are ever stopped or evicted;
/// preparing states (allocating, waiting, hashing) are left to settle.
fn is_stoppable(status: TorrentStatus) -> bool {
    matches!(status, TorrentStatus::Downloading | TorrentStatus::Seeding)
}

/// Compute the next running set and its diff against the current one.
///
/// Policies are interleaved round-robin into a start set of at most
/// `max_active` distinct torrents. Each candidate is admitted only if
/// its remaining bytes fit the disk budget, which charges *all* engine
/// downloads under the save path, mining-owned or not. A candidate
/// already selected is skipped without consuming the policy's turn.
/// The interleave stops when the cap is reached or every ranking is
/// exhausted.
pub fn plan_selection(
    loaded: &[MinedTorrent],
    all_downloads: &[StateSnapshot],
    policies: &[Arc<dyn Policy>],
    max_active: usize,
    max_disk_space_bytes: u64,
) -> SelectionPlan {
    let mut plan = SelectionPlan::default();
    if policies.is_empty() || loaded.is_empty() {
        return plan;
    }

    let committed: u64 = all_downloads.iter().map(StateSnapshot::committed_bytes).sum();
    let bytes_remaining = max_disk_space_bytes.saturating_sub(committed);

    let refs: Vec<&MinedTorrent> = loaded.iter().collect();
    let rankings: Vec<Vec<&MinedTorrent>> = policies.iter().map(|p| p.sort(&refs)).collect();
    let mut iterators: Vec<_> = rankings.iter().map(|r| r.iter()).collect();

    let mut selected: HashSet<InfoHash> = HashSet::new();
    let mut bytes_scheduled: u64 = 0;

    'fill: loop {
        let mut any_candidate = false;
        for iterator in iterators.iter_mut() {
            if selected.len() >= max_active {
                break 'fill;
            }
            // Pull this policy's next fresh candidate, skipping ones
            // another policy already placed.
            for torrent in iterator.by_ref() {
                if selected.contains(&torrent.infohash) {
                    continue;
                }
                any_candidate = true;
                let needed = torrent.remaining_bytes();
                if bytes_scheduled.saturating_add(needed) <= bytes_remaining {
                    bytes_scheduled += needed;
                    selected.insert(torrent.infohash);
                }
                break;
            }
        }
        if !any_candidate {
            break;
        }
    }

    for torrent in loaded {
        let Some(status) = torrent.status() else {
            continue;
        };
        if selected.contains(&torrent.infohash) {
            if status == TorrentStatus::Stopped {
                plan.start.push(torrent.infohash);
            }
        } else if is_stoppable(status) {
            if torrent.availability() < 1.0 {
                plan.evict.push(torrent.infohash);
            } else {
                plan.stop.push(torrent.infohash);
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{RandomPolicy, SeederRatioPolicy, UploadRatePolicy};
    use crate::testing::fixtures;
    use chrono::Duration;

    fn loaded(n: u8, status: TorrentStatus, length: u64) -> MinedTorrent {
        let mut entry = fixtures::loaded_torrent(n, status);
        if let Some(state) = entry.last_state.as_mut() {
            state.length = length;
        }
        entry
    }

    fn snapshots(entries: &[MinedTorrent]) -> Vec<StateSnapshot> {
        entries
            .iter()
            .filter_map(|e| e.last_state.clone())
            .collect()
    }

    fn policies(policy: impl Policy + 'static) -> Vec<Arc<dyn Policy>> {
        vec![Arc::new(policy)]
    }

    #[test]
    fn test_active_cap_limits_starts() {
        // Three stopped torrents of 400k each fit the 1M budget two at
        // a time; the cap picks exactly two.
        let entries: Vec<_> = (1..=3)
            .map(|n| loaded(n, TorrentStatus::Stopped, 400_000))
            .collect();

        let plan = plan_selection(
            &entries,
            &snapshots(&entries),
            &policies(RandomPolicy::with_seed(0)),
            2,
            1_000_000,
        );

        assert_eq!(plan.start.len(), 2);
        assert!(plan.stop.is_empty());
        assert!(plan.evict.is_empty());
    }

    #[test]
    fn test_disk_budget_bites_before_active_cap() {
        // Two 700k torrents; only one fits the 1M budget.
        let entries: Vec<_> = (1..=2)
            .map(|n| loaded(n, TorrentStatus::Stopped, 700_000))
            .collect();

        let plan = plan_selection(
            &entries,
            &snapshots(&entries),
            &policies(RandomPolicy::with_seed(0)),
            2,
            1_000_000,
        );

        assert_eq!(plan.start.len(), 1);
    }

    #[test]
    fn test_budget_charges_foreign_downloads() {
        // A user-owned download has already committed 800k of the 1M
        // budget, leaving room for none of the 400k torrents.
        let entries = vec![loaded(1, TorrentStatus::Stopped, 400_000)];
        let mut foreign = fixtures::snapshot(fixtures::infohash(99), TorrentStatus::Downloading);
        foreign.mining_owned = false;
        foreign.length = 1_600_000;
        foreign.progress = 0.5;

        let mut all = snapshots(&entries);
        all.push(foreign);

        let plan = plan_selection(
            &entries,
            &all,
            &policies(RandomPolicy::with_seed(0)),
            2,
            1_000_000,
        );

        assert!(plan.start.is_empty());
    }

    #[test]
    fn test_dead_swarm_evicted_live_swarm_stopped() {
        // Ranked by upload rate: `winner` takes the single slot. Of the
        // two unselected seeding torrents, the dead swarm is evicted
        // and the healthy one merely stopped.
        let mut winner = loaded(1, TorrentStatus::Seeding, 0);
        if let Some(state) = winner.last_state.as_mut() {
            state.bytes_up = 1_000_000;
        }
        winner.handle_since = winner
            .last_state
            .as_ref()
            .map(|s| s.captured_at - Duration::seconds(100));

        let mut dead = loaded(2, TorrentStatus::Seeding, 0);
        if let Some(state) = dead.last_state.as_mut() {
            state.availability = 0.3;
        }
        let healthy = loaded(3, TorrentStatus::Seeding, 0);

        let entries = vec![winner.clone(), dead.clone(), healthy.clone()];
        let plan = plan_selection(
            &entries,
            &snapshots(&entries),
            &policies(UploadRatePolicy),
            1,
            1_000_000,
        );

        assert!(plan.start.is_empty()); // winner is already running
        assert_eq!(plan.evict, vec![dead.infohash]);
        assert_eq!(plan.stop, vec![healthy.infohash]);
    }

    #[test]
    fn test_empty_inputs_are_noops() {
        let entries = vec![loaded(1, TorrentStatus::Stopped, 0)];

        let plan = plan_selection(&entries, &[], &[], 2, 1_000_000);
        assert!(plan.is_empty());

        let plan = plan_selection(
            &[],
            &[],
            &policies(RandomPolicy::with_seed(0)),
            2,
            1_000_000,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unknown_length_admits_freely() {
        let entries: Vec<_> = (1..=4)
            .map(|n| loaded(n, TorrentStatus::Stopped, 0))
            .collect();

        let plan = plan_selection(
            &entries,
            &snapshots(&entries),
            &policies(RandomPolicy::with_seed(0)),
            4,
            0, // no budget at all
        );

        assert_eq!(plan.start.len(), 4);
    }

    #[test]
    fn test_preparing_states_are_left_alone() {
        let hashing = loaded(1, TorrentStatus::Hashing, 0);
        let allocating = loaded(2, TorrentStatus::AllocatingDisk, 0);
        let entries = vec![hashing, allocating];

        // Cap 0 keeps both out of the start set; mid-preparation
        // torrents are still not stopped.
        let plan = plan_selection(
            &entries,
            &snapshots(&entries),
            &policies(RandomPolicy::with_seed(0)),
            0,
            1_000_000,
        );

        assert!(plan.is_empty());
    }

    #[test]
    fn test_overlapping_policies_fill_distinct_set() {
        let entries: Vec<_> = (1..=3)
            .map(|n| loaded(n, TorrentStatus::Stopped, 0))
            .collect();

        let mixed: Vec<Arc<dyn Policy>> = vec![
            Arc::new(UploadRatePolicy),
            Arc::new(SeederRatioPolicy),
            Arc::new(RandomPolicy::with_seed(0)),
        ];

        let plan = plan_selection(&entries, &snapshots(&entries), &mixed, 3, 1_000_000);

        let unique: HashSet<_> = plan.start.iter().collect();
        assert_eq!(plan.start.len(), 3);
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_selected_running_torrent_not_restarted() {
        let entries = vec![loaded(1, TorrentStatus::Seeding, 0)];

        let plan = plan_selection(
            &entries,
            &snapshots(&entries),
            &policies(RandomPolicy::with_seed(0)),
            1,
            1_000_000,
        );

        assert!(plan.is_empty());
    }
}
