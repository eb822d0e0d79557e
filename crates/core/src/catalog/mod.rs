//! Mined-torrent catalog: the authoritative `InfoHash -> MinedTorrent`
//! registry.
//!
//! The catalog is a pure data structure. It classifies announcements,
//! applies engine state, and reports which engine effects (adds,
//! removals, rechecks) the scheduler runner must perform; it never calls
//! the engine itself. All mutation happens under the scheduler's write
//! lock, which is the single serialization point spec'd for it.

mod types;

pub use types::MinedTorrent;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::engine::{DownloadHandle, DownloadState, InfoHash, TorrentStatus};
use crate::source::SourceId;

/// Outcome of classifying a discovery announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new entry was inserted; the caller must request an engine add.
    New,
    /// An existing entry gained (or already had) the announcing source.
    KnownSource,
    /// Dropped: the catalog is at `max_torrents_listed`.
    AtCapacity,
    /// Dropped: the engine already tracks this infohash (or holds a
    /// checkpoint for it); it will surface through the state channel.
    EngineOwned,
}

/// In-memory registry of mined torrents, keyed by infohash.
#[derive(Debug)]
pub struct Catalog {
    entries: HashMap<InfoHash, MinedTorrent>,
    /// Infohashes with an engine add requested but not yet resolved.
    adds_in_flight: HashSet<InfoHash>,
    max_listed: usize,
}

impl Catalog {
    pub fn new(max_listed: usize) -> Self {
        Self {
            entries: HashMap::new(),
            adds_in_flight: HashSet::new(),
            max_listed,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, infohash: &InfoHash) -> bool {
        self.entries.contains_key(infohash)
    }

    pub fn get(&self, infohash: &InfoHash) -> Option<&MinedTorrent> {
        self.entries.get(infohash)
    }

    /// Number of entries the engine currently tracks.
    pub fn loaded_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_loaded()).count()
    }

    /// Clone of every entry, for lock-free consumers.
    pub fn snapshot(&self) -> Vec<MinedTorrent> {
        self.entries.values().cloned().collect()
    }

    /// Classify an announcement per the admission rules: existing entry
    /// gains the source; then the capacity cap; then engine ownership;
    /// otherwise a fresh entry with an add to be requested.
    pub fn admit(
        &mut self,
        source: SourceId,
        infohash: InfoHash,
        name: impl Into<String>,
        engine_known: bool,
    ) -> Admission {
        if let Some(entry) = self.entries.get_mut(&infohash) {
            entry.sources.insert(source);
            return Admission::KnownSource;
        }
        if self.entries.len() >= self.max_listed {
            debug!("catalog full, dropping announcement for {}", infohash);
            return Admission::AtCapacity;
        }
        if engine_known {
            debug!("engine already owns {}, dropping announcement", infohash);
            return Admission::EngineOwned;
        }
        self.entries
            .insert(infohash, MinedTorrent::new(infohash, name, source));
        self.adds_in_flight.insert(infohash);
        Admission::New
    }

    /// Whether an engine add is currently outstanding for this hash.
    pub fn add_in_flight(&self, infohash: &InfoHash) -> bool {
        self.adds_in_flight.contains(infohash)
    }

    /// Clear the in-flight marker once the engine add resolved (either
    /// way; a failed add leaves the entry with an empty handle).
    pub fn mark_add_resolved(&mut self, infohash: &InfoHash) {
        self.adds_in_flight.remove(infohash);
    }

    /// Drop a source from every entry that carried it. Entries whose
    /// source set becomes empty are removed and returned so the caller
    /// can delete them from the engine (with content).
    pub fn remove_source(&mut self, source: &SourceId) -> Vec<MinedTorrent> {
        let mut evicted = Vec::new();
        self.entries.retain(|_, entry| {
            let contained = entry.sources.remove(source);
            if contained && entry.sources.is_empty() {
                evicted.push(entry.clone());
                false
            } else {
                true
            }
        });
        for entry in &evicted {
            self.adds_in_flight.remove(&entry.infohash);
        }
        evicted
    }

    /// Remove one entry outright (dead-swarm eviction).
    pub fn remove(&mut self, infohash: &InfoHash) -> Option<MinedTorrent> {
        self.adds_in_flight.remove(infohash);
        self.entries.remove(infohash)
    }

    /// Remove and return every entry (shutdown with download removal).
    pub fn drain(&mut self) -> Vec<MinedTorrent> {
        self.adds_in_flight.clear();
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Apply a batch of engine snapshots. Attaches handles, replaces
    /// last states, adopts unknown mining-owned downloads (pre-existing
    /// checkpoints), and returns the handles that need a one-time
    /// recheck after `StoppedOnError`.
    pub fn apply_states(&mut self, states: &[DownloadState]) -> Vec<Arc<dyn DownloadHandle>> {
        let mut recheck = Vec::new();

        for state in states {
            let infohash = state.snapshot.infohash;

            let known = self.entries.contains_key(&infohash);
            if !known && (!state.snapshot.mining_owned || self.entries.len() >= self.max_listed) {
                continue;
            }
            self.adds_in_flight.remove(&infohash);

            let entry = self.entries.entry(infohash).or_insert_with(|| {
                MinedTorrent::recovered(infohash, state.snapshot.name.clone())
            });
            if entry.handle.is_none() {
                entry.handle = Some(Arc::clone(&state.handle));
                entry.handle_since = Some(state.snapshot.captured_at);
            }
            if entry.display_name.is_empty() {
                entry.display_name = state.snapshot.name.clone();
            }
            if state.snapshot.status == TorrentStatus::StoppedOnError && !entry.rechecked_once {
                entry.rechecked_once = true;
                recheck.push(Arc::clone(&state.handle));
            }
            entry.last_state = Some(state.snapshot.clone());
        }

        recheck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn rss(n: u8) -> SourceId {
        SourceId::Rss(format!("http://feed/{}", n))
    }

    #[test]
    fn test_admit_new_then_known() {
        let mut catalog = Catalog::new(10);
        let hash = fixtures::infohash(1);

        assert_eq!(
            catalog.admit(rss(1), hash, "one", false),
            Admission::New
        );
        assert!(catalog.add_in_flight(&hash));

        // A second source for the same hash joins the entry.
        assert_eq!(
            catalog.admit(rss(2), hash, "one", false),
            Admission::KnownSource
        );
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(&hash).unwrap().sources.len(), 2);
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut catalog = Catalog::new(10);
        let hash = fixtures::infohash(1);

        catalog.admit(rss(1), hash, "one", false);
        let before = catalog.get(&hash).unwrap().clone();

        catalog.admit(rss(1), hash, "one", false);
        let after = catalog.get(&hash).unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(after.sources, before.sources);
        assert_eq!(after.display_name, before.display_name);
    }

    #[test]
    fn test_admit_respects_capacity() {
        let mut catalog = Catalog::new(2);
        catalog.admit(rss(1), fixtures::infohash(1), "a", false);
        catalog.admit(rss(1), fixtures::infohash(2), "b", false);

        assert_eq!(
            catalog.admit(rss(1), fixtures::infohash(3), "c", false),
            Admission::AtCapacity
        );
        assert_eq!(catalog.len(), 2);

        // Known hashes still gain sources at capacity.
        assert_eq!(
            catalog.admit(rss(2), fixtures::infohash(1), "a", false),
            Admission::KnownSource
        );
    }

    #[test]
    fn test_admit_defers_to_engine() {
        let mut catalog = Catalog::new(10);
        assert_eq!(
            catalog.admit(rss(1), fixtures::infohash(1), "a", true),
            Admission::EngineOwned
        );
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_remove_source_cascades() {
        let mut catalog = Catalog::new(10);
        let only_mine = fixtures::infohash(1);
        let shared = fixtures::infohash(2);

        catalog.admit(rss(1), only_mine, "a", false);
        catalog.admit(rss(1), shared, "b", false);
        catalog.admit(rss(2), shared, "b", false);

        let evicted = catalog.remove_source(&rss(1));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].infohash, only_mine);
        assert!(!catalog.contains(&only_mine));

        // The shared entry stays, minus the removed source.
        let entry = catalog.get(&shared).unwrap();
        assert_eq!(entry.sources.len(), 1);
        assert!(!entry.sources.contains(&rss(1)));
    }

    #[test]
    fn test_remove_unknown_source_is_noop() {
        let mut catalog = Catalog::new(10);
        catalog.admit(rss(1), fixtures::infohash(1), "a", false);

        let evicted = catalog.remove_source(&rss(9));
        assert!(evicted.is_empty());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_apply_states_attaches_handle_once() {
        let mut catalog = Catalog::new(10);
        let hash = fixtures::infohash(1);
        catalog.admit(rss(1), hash, "a", false);

        let first = fixtures::download_state(hash, TorrentStatus::Stopped);
        catalog.apply_states(std::slice::from_ref(&first));

        let entry = catalog.get(&hash).unwrap();
        assert!(entry.is_loaded());
        assert!(!catalog.add_in_flight(&hash));
        let attached_at = entry.handle_since.unwrap();

        // Later snapshots replace the state but keep the attach time.
        let mut second = fixtures::download_state(hash, TorrentStatus::Seeding);
        second.snapshot.bytes_up = 42;
        catalog.apply_states(std::slice::from_ref(&second));

        let entry = catalog.get(&hash).unwrap();
        assert_eq!(entry.handle_since.unwrap(), attached_at);
        assert_eq!(entry.last_state.as_ref().unwrap().bytes_up, 42);
        assert_eq!(entry.status(), Some(TorrentStatus::Seeding));
    }

    #[test]
    fn test_apply_states_adopts_mining_owned_downloads() {
        let mut catalog = Catalog::new(10);
        let mined = fixtures::infohash(1);
        let user_owned = fixtures::infohash(2);

        let mined_state = fixtures::download_state(mined, TorrentStatus::Stopped);
        let mut user_state = fixtures::download_state(user_owned, TorrentStatus::Downloading);
        user_state.snapshot.mining_owned = false;

        catalog.apply_states(&[mined_state, user_state]);

        assert!(catalog.contains(&mined));
        assert!(!catalog.contains(&user_owned));
        let entry = catalog.get(&mined).unwrap();
        assert!(entry.sources.is_empty());
        assert!(entry.is_loaded());
    }

    #[test]
    fn test_recheck_requested_exactly_once() {
        let mut catalog = Catalog::new(10);
        let hash = fixtures::infohash(1);
        catalog.admit(rss(1), hash, "a", false);

        let errored = fixtures::download_state(hash, TorrentStatus::StoppedOnError);
        let recheck = catalog.apply_states(std::slice::from_ref(&errored));
        assert_eq!(recheck.len(), 1);

        // The error persists; no second recheck is requested.
        let recheck = catalog.apply_states(std::slice::from_ref(&errored));
        assert!(recheck.is_empty());
        assert!(catalog.get(&hash).unwrap().rechecked_once);
    }

    #[test]
    fn test_drain_empties_catalog() {
        let mut catalog = Catalog::new(10);
        catalog.admit(rss(1), fixtures::infohash(1), "a", false);
        catalog.admit(rss(1), fixtures::infohash(2), "b", false);

        let drained = catalog.drain();
        assert_eq!(drained.len(), 2);
        assert!(catalog.is_empty());
        assert!(!catalog.add_in_flight(&fixtures::infohash(1)));
    }
}
