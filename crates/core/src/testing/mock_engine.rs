//! Mock torrent engine for testing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};

use crate::engine::{
    AddDownloadRequest, DownloadHandle, DownloadState, EngineError, InfoHash, StateSnapshot,
    TorrentEngine, TorrentStatus,
};

/// An operation recorded by a mock handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOp {
    Start,
    Stop,
    ForceRecheck,
    UploadOnly(bool),
}

/// Mock implementation of `DownloadHandle` that records every
/// operation for assertions.
#[derive(Debug)]
pub struct MockDownloadHandle {
    infohash: InfoHash,
    ops: Arc<RwLock<Vec<HandleOp>>>,
}

impl MockDownloadHandle {
    pub fn new(infohash: InfoHash) -> Self {
        Self {
            infohash,
            ops: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// All operations issued against this handle, in order.
    pub async fn ops(&self) -> Vec<HandleOp> {
        self.ops.read().await.clone()
    }

    /// How many times one operation was issued.
    pub async fn op_count(&self, op: &HandleOp) -> usize {
        self.ops.read().await.iter().filter(|o| *o == op).count()
    }
}

#[async_trait]
impl DownloadHandle for MockDownloadHandle {
    fn infohash(&self) -> InfoHash {
        self.infohash
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.ops.write().await.push(HandleOp::Start);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.ops.write().await.push(HandleOp::Stop);
        Ok(())
    }

    async fn force_recheck(&self) -> Result<(), EngineError> {
        self.ops.write().await.push(HandleOp::ForceRecheck);
        Ok(())
    }

    async fn set_upload_only(&self, enabled: bool) -> Result<(), EngineError> {
        self.ops.write().await.push(HandleOp::UploadOnly(enabled));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MockDownload {
    handle: Arc<MockDownloadHandle>,
    snapshot: StateSnapshot,
}

/// Mock implementation of the `TorrentEngine` trait.
///
/// Provides controllable behavior for testing:
/// - Track add/remove requests for assertions
/// - Control per-download snapshots and push them to subscribers
/// - Simulate add failures, checkpoints, and free disk space
///
/// # Example
///
/// ```rust,ignore
/// let engine = MockEngine::new();
///
/// // Pre-populate a download and change its state
/// let handle = engine.insert_download(snapshot).await;
/// engine.set_status(&hash, TorrentStatus::Seeding).await;
///
/// // Deliver a snapshot batch to subscribers
/// engine.push_states().await;
///
/// // Assert on recorded operations
/// assert_eq!(handle.op_count(&HandleOp::Start).await, 1);
/// ```
#[derive(Debug)]
pub struct MockEngine {
    downloads: RwLock<HashMap<InfoHash, MockDownload>>,
    added: RwLock<Vec<AddDownloadRequest>>,
    removed: RwLock<Vec<(InfoHash, bool)>>,
    next_add_error: RwLock<Option<EngineError>>,
    subscribers: StdMutex<Vec<mpsc::Sender<Vec<DownloadState>>>>,
    checkpoints: StdMutex<HashSet<InfoHash>>,
    free_disk: AtomicU64,
    state_dir: PathBuf,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            downloads: RwLock::new(HashMap::new()),
            added: RwLock::new(Vec::new()),
            removed: RwLock::new(Vec::new()),
            next_add_error: RwLock::new(None),
            subscribers: StdMutex::new(Vec::new()),
            checkpoints: StdMutex::new(HashSet::new()),
            free_disk: AtomicU64::new(10 * 1024 * 1024 * 1024 * 1024), // 10 TiB
            state_dir: PathBuf::from("/nonexistent/mock-engine-state"),
        }
    }

    /// Use a real directory as the checkpoint state dir.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::new()
        }
    }

    /// All recorded add requests.
    pub async fn added_requests(&self) -> Vec<AddDownloadRequest> {
        self.added.read().await.clone()
    }

    /// All recorded removals as `(infohash, delete_content)`.
    pub async fn removed_downloads(&self) -> Vec<(InfoHash, bool)> {
        self.removed.read().await.clone()
    }

    /// Configure the next `add` to fail with the given error.
    pub async fn set_next_add_error(&self, error: EngineError) {
        *self.next_add_error.write().await = Some(error);
    }

    /// Pre-populate a download (for startup-recovery scenarios and
    /// direct state control).
    pub async fn insert_download(&self, snapshot: StateSnapshot) -> Arc<MockDownloadHandle> {
        let handle = Arc::new(MockDownloadHandle::new(snapshot.infohash));
        self.downloads.write().await.insert(
            snapshot.infohash,
            MockDownload {
                handle: Arc::clone(&handle),
                snapshot,
            },
        );
        handle
    }

    /// Mutate the stored snapshot for one download.
    pub async fn set_snapshot(&self, infohash: &InfoHash, f: impl FnOnce(&mut StateSnapshot)) {
        if let Some(download) = self.downloads.write().await.get_mut(infohash) {
            f(&mut download.snapshot);
        }
    }

    /// Set the status for one download.
    pub async fn set_status(&self, infohash: &InfoHash, status: TorrentStatus) {
        self.set_snapshot(infohash, |s| s.status = status).await;
    }

    /// The handle for one download, if tracked.
    pub async fn handle(&self, infohash: &InfoHash) -> Option<Arc<MockDownloadHandle>> {
        self.downloads
            .read()
            .await
            .get(infohash)
            .map(|d| Arc::clone(&d.handle))
    }

    pub async fn download_count(&self) -> usize {
        self.downloads.read().await.len()
    }

    /// Mark a checkpoint as existing for an infohash.
    pub fn add_checkpoint(&self, infohash: InfoHash) {
        self.checkpoints.lock().unwrap().insert(infohash);
    }

    pub fn set_free_disk(&self, bytes: u64) {
        self.free_disk.store(bytes, Ordering::SeqCst);
    }

    fn current_states(downloads: &HashMap<InfoHash, MockDownload>) -> Vec<DownloadState> {
        downloads
            .values()
            .map(|d| DownloadState {
                handle: d.handle.clone() as Arc<dyn DownloadHandle>,
                snapshot: d.snapshot.clone(),
            })
            .collect()
    }

    /// Deliver the current snapshot batch to every subscriber, the way
    /// a real engine does on its own cadence.
    pub async fn push_states(&self) {
        let batch = Self::current_states(&*self.downloads.read().await);
        let subscribers = self.subscribers.lock().unwrap().clone();
        for tx in subscribers {
            // Full channels drop the batch; the next push supersedes it.
            let _ = tx.try_send(batch.clone());
        }
    }
}

#[async_trait]
impl TorrentEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn add(
        &self,
        request: AddDownloadRequest,
    ) -> Result<Arc<dyn DownloadHandle>, EngineError> {
        if let Some(err) = self.next_add_error.write().await.take() {
            return Err(err);
        }
        if self.downloads.read().await.contains_key(&request.infohash) {
            return Err(EngineError::AlreadyExists(request.infohash));
        }

        self.added.write().await.push(request.clone());

        let snapshot = StateSnapshot {
            infohash: request.infohash,
            name: request.name.clone(),
            status: if request.initially_stopped {
                TorrentStatus::Stopped
            } else {
                TorrentStatus::Downloading
            },
            progress: 0.0,
            length: 0,
            bytes_up: 0,
            bytes_down: 0,
            connected_seeds: 0,
            connected_peers: 0,
            availability: 0.0,
            mining_owned: request.hidden,
            captured_at: Utc::now(),
        };
        let handle = self.insert_download(snapshot).await;
        Ok(handle as Arc<dyn DownloadHandle>)
    }

    async fn remove(
        &self,
        handle: Arc<dyn DownloadHandle>,
        delete_content: bool,
    ) -> Result<(), EngineError> {
        let infohash = handle.infohash();
        self.removed.write().await.push((infohash, delete_content));
        // Removing an already-removed download still succeeds.
        self.downloads.write().await.remove(&infohash);
        Ok(())
    }

    async fn list_downloads(&self) -> Vec<DownloadState> {
        Self::current_states(&*self.downloads.read().await)
    }

    fn subscribe_states(&self, tx: mpsc::Sender<Vec<DownloadState>>) {
        self.subscribers.lock().unwrap().push(tx);
    }

    fn checkpoint_exists(&self, infohash: &InfoHash) -> bool {
        self.checkpoints.lock().unwrap().contains(infohash)
    }

    fn downloads_state_dir(&self) -> PathBuf {
        self.state_dir.clone()
    }

    fn free_disk_bytes(&self, _path: &Path) -> Result<u64, EngineError> {
        Ok(self.free_disk.load(Ordering::SeqCst))
    }
}
