//! Types for the mined-torrent catalog.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::{DownloadHandle, InfoHash, StateSnapshot, TorrentStatus};
use crate::source::SourceId;

/// One torrent the scheduler is mining.
///
/// The entry exists because at least one source announced the infohash
/// (or because the engine reported a pre-existing mining-owned
/// download). The engine handle is present iff the engine currently
/// tracks the torrent, and its infohash always equals `infohash`.
#[derive(Debug, Clone)]
pub struct MinedTorrent {
    /// Swarm identity; immutable after creation.
    pub infohash: InfoHash,
    /// Display name from the first announcement.
    pub display_name: String,
    /// Sources that have announced this infohash. Empty only for
    /// entries recovered from pre-existing engine checkpoints.
    pub sources: HashSet<SourceId>,
    /// Live engine handle, when the engine tracks this torrent.
    pub handle: Option<Arc<dyn DownloadHandle>>,
    /// When the handle first attached; denominator for upload-rate
    /// scoring.
    pub handle_since: Option<DateTime<Utc>>,
    /// Latest engine snapshot; wholly replaced on every report.
    pub last_state: Option<StateSnapshot>,
    /// Guards against recheck loops on permanent errors.
    pub rechecked_once: bool,
}

impl MinedTorrent {
    /// New entry for a source announcement.
    pub fn new(infohash: InfoHash, display_name: impl Into<String>, source: SourceId) -> Self {
        let mut sources = HashSet::new();
        sources.insert(source);
        Self {
            infohash,
            display_name: display_name.into(),
            sources,
            handle: None,
            handle_since: None,
            last_state: None,
            rechecked_once: false,
        }
    }

    /// Entry adopted from a pre-existing engine download with no known
    /// provenance.
    pub(crate) fn recovered(infohash: InfoHash, display_name: impl Into<String>) -> Self {
        Self {
            infohash,
            display_name: display_name.into(),
            sources: HashSet::new(),
            handle: None,
            handle_since: None,
            last_state: None,
            rechecked_once: false,
        }
    }

    /// Whether the engine currently tracks this torrent.
    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    pub fn status(&self) -> Option<TorrentStatus> {
        self.last_state.as_ref().map(|s| s.status)
    }

    /// Last reported swarm availability; 0 when nothing was reported.
    pub fn availability(&self) -> f64 {
        self.last_state.as_ref().map_or(0.0, |s| s.availability)
    }

    /// `seeds / (seeds + peers + 1)`; 0 without a reported state.
    pub fn seeder_ratio(&self) -> f64 {
        match &self.last_state {
            Some(s) => {
                s.connected_seeds as f64 / (s.connected_seeds + s.connected_peers + 1) as f64
            }
            None => 0.0,
        }
    }

    /// Uploaded bytes per second of engine-tracked time; 0 without a
    /// handle or with no elapsed time yet.
    pub fn upload_rate(&self) -> f64 {
        let (Some(state), Some(since)) = (&self.last_state, self.handle_since) else {
            return 0.0;
        };
        let secs = (state.captured_at - since).num_seconds();
        if secs <= 0 {
            return 0.0;
        }
        state.bytes_up as f64 / secs as f64
    }

    /// Bytes this torrent would still pull onto disk if started.
    pub fn remaining_bytes(&self) -> u64 {
        self.last_state.as_ref().map_or(0, |s| s.remaining_bytes())
    }
}
