//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external traits
//! (engine, channel overlay) plus fixtures, allowing the scheduler to
//! be exercised end to end without a real BitTorrent engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use seedmine_core::testing::{fixtures, MockEngine};
//!
//! let engine = MockEngine::new();
//! engine.insert_download(fixtures::snapshot(hash, TorrentStatus::Stopped)).await;
//! engine.push_states().await;
//! ```

mod mock_engine;
mod mock_overlay;

pub use mock_engine::{HandleOp, MockDownloadHandle, MockEngine};
pub use mock_overlay::MockChannelOverlay;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use chrono::Utc;
    use sha1::{Digest, Sha1};

    use super::MockDownloadHandle;
    use crate::catalog::MinedTorrent;
    use crate::engine::{DownloadHandle, DownloadState, InfoHash, StateSnapshot, TorrentStatus};
    use crate::source::SourceId;

    /// A deterministic infohash with every byte set to `n`.
    pub fn infohash(n: u8) -> InfoHash {
        InfoHash::new([n; 20])
    }

    /// A snapshot with healthy defaults: unknown length, no transfer
    /// yet, availability comfortably above the dead-swarm threshold.
    pub fn snapshot(infohash: InfoHash, status: TorrentStatus) -> StateSnapshot {
        StateSnapshot {
            infohash,
            name: format!("torrent-{}", &infohash.to_string()[..8]),
            status,
            progress: 0.0,
            length: 0,
            bytes_up: 0,
            bytes_down: 0,
            connected_seeds: 0,
            connected_peers: 0,
            availability: 2.0,
            mining_owned: true,
            captured_at: Utc::now(),
        }
    }

    /// A `DownloadState` backed by a fresh mock handle.
    pub fn download_state(infohash: InfoHash, status: TorrentStatus) -> DownloadState {
        DownloadState {
            handle: Arc::new(MockDownloadHandle::new(infohash)) as Arc<dyn DownloadHandle>,
            snapshot: snapshot(infohash, status),
        }
    }

    /// A catalog entry announced by a fixture RSS source, not yet
    /// loaded into the engine.
    pub fn mined_torrent(n: u8) -> MinedTorrent {
        MinedTorrent::new(
            infohash(n),
            format!("mined-{}", n),
            SourceId::Rss(format!("http://fixture/{}", n)),
        )
    }

    /// A catalog entry with an attached handle and a last state in the
    /// given status.
    pub fn loaded_torrent(n: u8, status: TorrentStatus) -> MinedTorrent {
        let mut entry = mined_torrent(n);
        let state = snapshot(entry.infohash, status);
        entry.handle =
            Some(Arc::new(MockDownloadHandle::new(entry.infohash)) as Arc<dyn DownloadHandle>);
        entry.handle_since = Some(state.captured_at);
        entry.last_state = Some(state);
        entry
    }

    /// Minimal valid single-file `.torrent` bytes plus the real
    /// infohash (SHA1 of the info dictionary).
    pub fn torrent_bytes(name: &str, length: u64) -> (Vec<u8>, InfoHash) {
        let mut info: Vec<u8> = Vec::new();
        info.extend_from_slice(
            format!(
                "d6:lengthi{}e4:name{}:{}12:piece lengthi2097152e6:pieces20:",
                length,
                name.len(),
                name
            )
            .as_bytes(),
        );
        info.extend_from_slice(&[0u8; 20]);
        info.push(b'e');

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"d8:announce26:http://tracker.example/ann4:info");
        out.extend_from_slice(&info);
        out.push(b'e');

        let mut hasher = Sha1::new();
        hasher.update(&info);
        let digest: [u8; 20] = hasher.finalize().into();
        (out, InfoHash::new(digest))
    }
}
