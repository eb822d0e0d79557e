//! Types for the BitTorrent engine adapter.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("download already exists: {0}")]
    AlreadyExists(InfoHash),

    #[error("download not found: {0}")]
    NotFound(InfoHash),

    #[error("engine I/O error: {0}")]
    Io(String),

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Error kind, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::NotFound(_) => "not_found",
            EngineError::Io(_) => "io",
            EngineError::Internal(_) => "internal",
        }
    }
}

/// Error parsing an infohash from its hex rendering.
#[derive(Debug, Error)]
#[error("invalid infohash: {0}")]
pub struct InfoHashParseError(String);

/// The 20-byte swarm identity of a torrent.
///
/// Renders as 40-char lowercase hex; serializes as that hex string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub const fn new(bytes: [u8; 20]) -> Self {
        InfoHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse from a 40-char hex string.
    pub fn from_hex(s: &str) -> Result<Self, InfoHashParseError> {
        let raw = hex::decode(s).map_err(|_| InfoHashParseError(s.to_string()))?;
        let bytes: [u8; 20] = raw
            .try_into()
            .map_err(|_| InfoHashParseError(s.to_string()))?;
        Ok(InfoHash(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = InfoHashParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        InfoHash::from_hex(&s)
    }
}

impl From<InfoHash> for String {
    fn from(hash: InfoHash) -> String {
        hash.to_string()
    }
}

/// State of a download, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    /// Pre-allocating disk space.
    AllocatingDisk,
    /// Queued for a hash check.
    WaitingForHashCheck,
    /// Hash-checking existing data.
    Hashing,
    /// Downloading from peers.
    Downloading,
    /// Seeding to peers.
    Seeding,
    /// Stopped by request.
    Stopped,
    /// Stopped because of an error.
    StoppedOnError,
}

impl TorrentStatus {
    /// Returns the string representation for logs and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentStatus::AllocatingDisk => "allocating_disk",
            TorrentStatus::WaitingForHashCheck => "waiting_for_hash_check",
            TorrentStatus::Hashing => "hashing",
            TorrentStatus::Downloading => "downloading",
            TorrentStatus::Seeding => "seeding",
            TorrentStatus::Stopped => "stopped",
            TorrentStatus::StoppedOnError => "stopped_on_error",
        }
    }

    /// True for both stopped variants.
    pub fn is_stopped(&self) -> bool {
        matches!(self, TorrentStatus::Stopped | TorrentStatus::StoppedOnError)
    }
}

/// Point-in-time statistics for one download.
///
/// A later snapshot fully supersedes an earlier one for the same
/// infohash; nothing is merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Swarm identity.
    pub infohash: InfoHash,
    /// Display name.
    pub name: String,
    /// Current status.
    pub status: TorrentStatus,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    /// Total size in bytes; 0 while metadata is unknown.
    pub length: u64,
    /// Total bytes uploaded (monotonic).
    pub bytes_up: u64,
    /// Total bytes downloaded (monotonic).
    pub bytes_down: u64,
    /// Connected seeds; may fluctuate.
    pub connected_seeds: u32,
    /// Connected downloading peers; may fluctuate.
    pub connected_peers: u32,
    /// Estimated reachable full copies in the swarm; < 1.0 means the
    /// swarm cannot self-sustain.
    pub availability: f64,
    /// Whether the scheduler owns this download (added hidden by us).
    pub mining_owned: bool,
    /// When the engine captured this snapshot.
    pub captured_at: DateTime<Utc>,
}

impl StateSnapshot {
    /// Bytes this download still has to fetch; 0 while the length is
    /// unknown, so metadata-less torrents exert no disk pressure.
    pub fn remaining_bytes(&self) -> u64 {
        ((1.0 - self.progress.clamp(0.0, 1.0)) * self.length as f64) as u64
    }

    /// Bytes already committed to disk by this download.
    pub fn committed_bytes(&self) -> u64 {
        (self.progress.clamp(0.0, 1.0) * self.length as f64) as u64
    }
}

/// One download as reported through the state channel: the live handle
/// plus its current snapshot.
#[derive(Debug, Clone)]
pub struct DownloadState {
    pub handle: Arc<dyn DownloadHandle>,
    pub snapshot: StateSnapshot,
}

/// Request to add a new download to the engine.
#[derive(Debug, Clone)]
pub struct AddDownloadRequest {
    /// Swarm identity.
    pub infohash: InfoHash,
    /// Display name.
    pub name: String,
    /// Directory the engine writes content into.
    pub save_path: PathBuf,
    /// Hide the download from user-facing listings.
    pub hidden: bool,
    /// Create the download stopped so the selector decides when it runs.
    pub initially_stopped: bool,
    /// Anonymization hops.
    pub hops: u32,
}

impl AddDownloadRequest {
    /// Create a request with mining defaults: hidden, initially stopped,
    /// one anonymization hop.
    pub fn new(infohash: InfoHash, name: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            infohash,
            name: name.into(),
            save_path: save_path.into(),
            hidden: true,
            initially_stopped: true,
            hops: 1,
        }
    }

    pub fn with_hops(mut self, hops: u32) -> Self {
        self.hops = hops;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_initially_stopped(mut self, stopped: bool) -> Self {
        self.initially_stopped = stopped;
        self
    }
}

/// A live reference to one engine download.
///
/// All operations are best-effort: the engine reconciles asynchronously,
/// and callers log failures rather than propagate them.
#[async_trait]
pub trait DownloadHandle: Send + Sync + fmt::Debug {
    /// Swarm identity of the underlying download.
    fn infohash(&self) -> InfoHash;

    /// Start (or resume) transferring.
    async fn start(&self) -> Result<(), EngineError>;

    /// Stop transferring; the checkpoint stays on disk.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Re-verify on-disk data against piece hashes.
    async fn force_recheck(&self) -> Result<(), EngineError>;

    /// Keep uploading known pieces but stop requesting new ones.
    async fn set_upload_only(&self, enabled: bool) -> Result<(), EngineError>;
}

/// Trait for BitTorrent engine backends.
///
/// The adapter only translates scheduler intent into engine operations
/// and surfaces state events back; it never consults policies or touches
/// the catalog.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Add a new download. On success the engine tracks it under the
    /// request's infohash, stopped if `initially_stopped` was set.
    async fn add(&self, request: AddDownloadRequest) -> Result<Arc<dyn DownloadHandle>, EngineError>;

    /// Remove a download, optionally deleting its content. Removing an
    /// already-removed download succeeds.
    async fn remove(
        &self,
        handle: Arc<dyn DownloadHandle>,
        delete_content: bool,
    ) -> Result<(), EngineError>;

    /// All downloads the engine currently tracks.
    async fn list_downloads(&self) -> Vec<DownloadState>;

    /// Register a channel the engine pushes full snapshot batches into
    /// at its own cadence. The engine must never block on the channel:
    /// a full channel drops the batch, and the next one supersedes it.
    fn subscribe_states(&self, tx: mpsc::Sender<Vec<DownloadState>>);

    /// Whether a persistent checkpoint exists for this infohash.
    fn checkpoint_exists(&self, infohash: &InfoHash) -> bool;

    /// Directory holding per-download checkpoint files
    /// (`<infohash>.state`).
    fn downloads_state_dir(&self) -> PathBuf;

    /// Free bytes on the filesystem containing `path`.
    fn free_disk_bytes(&self, path: &Path) -> Result<u64, EngineError> {
        fs2::available_space(path).map_err(|e| EngineError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infohash_hex_round_trip() {
        let hash = InfoHash::new([0xab; 20]);
        let hex = hash.to_string();
        assert_eq!(hex.len(), 40);
        assert_eq!(hex, "ab".repeat(20));
        assert_eq!(InfoHash::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_infohash_rejects_bad_hex() {
        assert!(InfoHash::from_hex("zz").is_err());
        assert!(InfoHash::from_hex(&"ab".repeat(19)).is_err());
        assert!(InfoHash::from_hex(&"ab".repeat(21)).is_err());
    }

    #[test]
    fn test_infohash_serde_as_hex_string() {
        let hash = InfoHash::new([0x01; 20]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(20)));
        let parsed: InfoHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(TorrentStatus::Downloading.as_str(), "downloading");
        assert_eq!(TorrentStatus::Seeding.as_str(), "seeding");
        assert_eq!(TorrentStatus::StoppedOnError.as_str(), "stopped_on_error");
    }

    #[test]
    fn test_status_is_stopped() {
        assert!(TorrentStatus::Stopped.is_stopped());
        assert!(TorrentStatus::StoppedOnError.is_stopped());
        assert!(!TorrentStatus::Seeding.is_stopped());
        assert!(!TorrentStatus::Hashing.is_stopped());
    }

    #[test]
    fn test_add_request_builder() {
        let hash = InfoHash::new([0x02; 20]);
        let req = AddDownloadRequest::new(hash, "test", "/tmp/mined")
            .with_hops(2)
            .with_hidden(false)
            .with_initially_stopped(false);

        assert_eq!(req.infohash, hash);
        assert_eq!(req.name, "test");
        assert_eq!(req.hops, 2);
        assert!(!req.hidden);
        assert!(!req.initially_stopped);
    }

    #[test]
    fn test_add_request_mining_defaults() {
        let req = AddDownloadRequest::new(InfoHash::new([0; 20]), "t", "/x");
        assert!(req.hidden);
        assert!(req.initially_stopped);
        assert_eq!(req.hops, 1);
    }

    #[test]
    fn test_snapshot_byte_accounting() {
        let snapshot = StateSnapshot {
            infohash: InfoHash::new([0; 20]),
            name: "t".to_string(),
            status: TorrentStatus::Downloading,
            progress: 0.25,
            length: 1000,
            bytes_up: 0,
            bytes_down: 250,
            connected_seeds: 0,
            connected_peers: 0,
            availability: 1.0,
            mining_owned: true,
            captured_at: Utc::now(),
        };
        assert_eq!(snapshot.remaining_bytes(), 750);
        assert_eq!(snapshot.committed_bytes(), 250);
    }

    #[test]
    fn test_snapshot_unknown_length_is_free() {
        let snapshot = StateSnapshot {
            infohash: InfoHash::new([0; 20]),
            name: "t".to_string(),
            status: TorrentStatus::Downloading,
            progress: 0.0,
            length: 0,
            bytes_up: 0,
            bytes_down: 0,
            connected_seeds: 0,
            connected_peers: 0,
            availability: 0.0,
            mining_owned: true,
            captured_at: Utc::now(),
        };
        assert_eq!(snapshot.remaining_bytes(), 0);
        assert_eq!(snapshot.committed_bytes(), 0);
    }
}
