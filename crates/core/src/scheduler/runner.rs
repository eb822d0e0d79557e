//! The mining scheduler: owns the catalog, drives the control loops.
//!
//! Four background tasks cooperate around the shared catalog:
//! - the state loop drains engine snapshot batches,
//! - the discovery loop drains source announcements and requests adds,
//! - the selector loop reconciles the running set on its interval,
//! - the governor loop watches free disk space.
//!
//! Catalog mutations only happen in these loops, under the write lock;
//! everything else reads snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{Admission, Catalog, MinedTorrent};
use crate::engine::{
    AddDownloadRequest, DownloadHandle, DownloadState, InfoHash, StateSnapshot, TorrentEngine,
};
use crate::metrics;
use crate::policy::{default_policies, Policy};
use crate::source::{DiscoveryCallback, Source, SourceId};

use super::config::MinerConfig;
use super::governor::DiskGovernor;
use super::selector::{plan_selection, SelectionPlan};
use super::types::{DiscoveryEvent, SchedulerError, SchedulerStatus};

/// Cap on waiting for a loop task (and its in-flight engine add) at
/// shutdown; past it the task is abandoned and the engine cleans up.
const SHUTDOWN_TASK_TIMEOUT: Duration = Duration::from_secs(5);
/// Cap per engine removal during `shutdown(remove_downloads=true)`.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// The credit-mining scheduler.
pub struct SwarmScheduler {
    config: MinerConfig,
    engine: Arc<dyn TorrentEngine>,
    policies: Vec<Arc<dyn Policy>>,
    catalog: Arc<RwLock<Catalog>>,
    /// Latest snapshot per engine download, mining-owned or not; a new
    /// batch wholly replaces it.
    latest: Arc<RwLock<HashMap<InfoHash, DownloadState>>>,
    sources: Arc<RwLock<HashMap<SourceId, Arc<dyn Source>>>>,
    governor: Arc<Mutex<DiskGovernor>>,

    running: Arc<AtomicBool>,
    /// Set once the engine has reported at least as many downloads as
    /// there were pre-existing checkpoint files; the selector idles
    /// until then.
    ready: Arc<AtomicBool>,
    expected_checkpoints: usize,

    shutdown_tx: broadcast::Sender<()>,
    discovery_tx: mpsc::Sender<DiscoveryEvent>,
    discovery_rx: Mutex<Option<mpsc::Receiver<DiscoveryEvent>>>,
    states_rx: Mutex<Option<mpsc::Receiver<Vec<DownloadState>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SwarmScheduler {
    /// Create a scheduler with the default policy mix (upload rate +
    /// random).
    pub fn new(engine: Arc<dyn TorrentEngine>, config: MinerConfig) -> Result<Self, SchedulerError> {
        Self::with_policies(engine, config, default_policies())
    }

    pub fn with_policies(
        engine: Arc<dyn TorrentEngine>,
        config: MinerConfig,
        policies: Vec<Arc<dyn Policy>>,
    ) -> Result<Self, SchedulerError> {
        ensure_save_path(&config.save_path)?;
        let expected_checkpoints = count_checkpoints(&engine.downloads_state_dir());

        let (shutdown_tx, _) = broadcast::channel(1);
        let (discovery_tx, discovery_rx) = mpsc::channel(1024);
        let (states_tx, states_rx) = mpsc::channel(64);
        engine.subscribe_states(states_tx);

        Ok(Self {
            catalog: Arc::new(RwLock::new(Catalog::new(config.max_torrents_listed))),
            latest: Arc::new(RwLock::new(HashMap::new())),
            sources: Arc::new(RwLock::new(HashMap::new())),
            governor: Arc::new(Mutex::new(DiskGovernor::new(config.low_disk_space_bytes))),
            running: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(false)),
            expected_checkpoints,
            shutdown_tx,
            discovery_tx,
            discovery_rx: Mutex::new(Some(discovery_rx)),
            states_rx: Mutex::new(Some(states_rx)),
            tasks: Mutex::new(Vec::new()),
            config,
            engine,
            policies,
        })
    }

    /// Spawn the background loops. Starting an already-running
    /// scheduler is a no-op.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running");
            return;
        }

        info!("starting mining scheduler");

        let mut tasks = self.tasks.lock().await;
        if let Some(rx) = self.states_rx.lock().await.take() {
            tasks.push(self.spawn_state_loop(rx));
        }
        if let Some(rx) = self.discovery_rx.lock().await.take() {
            tasks.push(self.spawn_discovery_loop(rx));
        }
        tasks.push(self.spawn_selector_loop());
        tasks.push(self.spawn_governor_loop());

        info!("mining scheduler started");
    }

    /// Register and start a source. Duplicate identities are rejected.
    pub async fn add_source(&self, source: Arc<dyn Source>) -> Result<(), SchedulerError> {
        let id = source.id();
        {
            let mut sources = self.sources.write().await;
            if sources.contains_key(&id) {
                return Err(SchedulerError::DuplicateSource(id));
            }
            sources.insert(id.clone(), Arc::clone(&source));
        }

        let tx = self.discovery_tx.clone();
        let callback: DiscoveryCallback = Arc::new(move |source, infohash, name| {
            let event = DiscoveryEvent {
                source,
                infohash,
                name,
            };
            // The callback must never block the source; a full queue
            // drops the announcement and the source's next tick
            // re-announces.
            if tx.try_send(event).is_err() {
                warn!("discovery queue full, dropping announcement");
            }
        });
        source.start(callback).await;

        info!("added source {}", id);
        Ok(())
    }

    /// Stop a source and drop it from every catalog entry; entries left
    /// without provenance are removed from the engine with content.
    pub async fn remove_source(&self, id: &SourceId) -> Result<(), SchedulerError> {
        let source = self
            .sources
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::UnknownSource(id.clone()))?;
        source.stop().await;

        let evicted = self.catalog.write().await.remove_source(id);
        metrics::CATALOG_SIZE.set(self.catalog.read().await.len() as i64);
        for entry in evicted {
            info!("removing torrent {}", entry.infohash);
            metrics::TORRENTS_REMOVED.inc();
            if let Some(handle) = entry.handle {
                if let Err(e) = self.engine.remove(handle, true).await {
                    warn!("remove failed for {}: {}", entry.infohash, e);
                }
            }
        }

        info!("removed source {}", id);
        Ok(())
    }

    /// Current scheduler status snapshot.
    pub async fn status(&self) -> SchedulerStatus {
        let catalog = self.catalog.read().await;
        SchedulerStatus {
            running: self.running.load(Ordering::Relaxed),
            ready: self.ready.load(Ordering::Relaxed),
            catalog_size: catalog.len(),
            loaded_count: catalog.loaded_count(),
            source_count: self.sources.read().await.len(),
            upload_only: self.governor.lock().await.upload_only(),
        }
    }

    /// Run one selector pass immediately, outside the timer cadence.
    pub async fn select_now(&self) {
        if !self.ready.load(Ordering::SeqCst) {
            debug!("selector idle until catalog catches up");
            return;
        }
        Self::selector_tick(
            &self.catalog,
            &self.latest,
            &self.engine,
            &self.policies,
            &self.config,
        )
        .await;
    }

    /// Run one governor pass immediately, outside the timer cadence.
    pub async fn check_disk_now(&self) {
        Self::governor_tick(
            &self.governor,
            &self.latest,
            &self.engine,
            &self.config.save_path,
        )
        .await;
    }

    /// Stop everything. Idempotent and bounded: loop tasks (and any
    /// in-flight engine add inside them) get a grace period each, then
    /// are abandoned. With `remove_downloads`, every mining entry is
    /// removed from the engine with its content.
    pub async fn shutdown(&self, remove_downloads: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("scheduler already shut down");
            return;
        }

        info!("shutting down mining scheduler");
        let _ = self.shutdown_tx.send(());

        let sources: Vec<_> = self.sources.write().await.drain().map(|(_, s)| s).collect();
        for source in sources {
            source.stop().await;
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_TASK_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        if remove_downloads {
            let entries = self.catalog.write().await.drain();
            let removals = entries
                .into_iter()
                .filter_map(|entry| entry.handle.map(|handle| (entry.infohash, handle)))
                .map(|(infohash, handle)| {
                    let engine = Arc::clone(&self.engine);
                    async move {
                        info!("removing torrent {}", infohash);
                        match tokio::time::timeout(REMOVE_TIMEOUT, engine.remove(handle, true))
                            .await
                        {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!("remove failed for {}: {}", infohash, e),
                            Err(_) => warn!("remove timed out for {}", infohash),
                        }
                    }
                });
            futures::future::join_all(removals).await;
        }

        info!("mining scheduler stopped");
    }

    fn spawn_state_loop(&self, mut rx: mpsc::Receiver<Vec<DownloadState>>) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let catalog = Arc::clone(&self.catalog);
        let latest = Arc::clone(&self.latest);
        let ready = Arc::clone(&self.ready);
        let expected = self.expected_checkpoints;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("state loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    batch = rx.recv() => {
                        let Some(batch) = batch else { break };
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::apply_engine_states(&catalog, &latest, &ready, expected, batch).await;
                    }
                }
            }
            debug!("state loop stopped");
        })
    }

    fn spawn_discovery_loop(&self, mut rx: mpsc::Receiver<DiscoveryEvent>) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let catalog = Arc::clone(&self.catalog);
        let latest = Arc::clone(&self.latest);
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("discovery loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::handle_discovery(&catalog, &latest, &engine, &config, event).await;
                    }
                }
            }
            debug!("discovery loop stopped");
        })
    }

    fn spawn_selector_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let ready = Arc::clone(&self.ready);
        let catalog = Arc::clone(&self.catalog);
        let latest = Arc::clone(&self.latest);
        let engine = Arc::clone(&self.engine);
        let policies = self.policies.clone();
        let config = self.config.clone();
        let interval = Duration::from_secs(self.config.select_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("selector loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if !ready.load(Ordering::SeqCst) {
                            debug!("selector idle until catalog catches up");
                            continue;
                        }
                        Self::selector_tick(&catalog, &latest, &engine, &policies, &config).await;
                    }
                }
            }
            debug!("selector loop stopped");
        })
    }

    fn spawn_governor_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let governor = Arc::clone(&self.governor);
        let latest = Arc::clone(&self.latest);
        let engine = Arc::clone(&self.engine);
        let save_path = self.config.save_path.clone();
        let interval = Duration::from_secs(self.config.disk_check_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("governor loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::governor_tick(&governor, &latest, &engine, &save_path).await;
                    }
                }
            }
            debug!("governor loop stopped");
        })
    }

    /// Apply one engine snapshot batch: replace the latest-state map,
    /// unlock the selector once persisted state has caught up, update
    /// the catalog, and issue any one-shot rechecks it reports.
    async fn apply_engine_states(
        catalog: &RwLock<Catalog>,
        latest: &RwLock<HashMap<InfoHash, DownloadState>>,
        ready: &AtomicBool,
        expected_checkpoints: usize,
        batch: Vec<DownloadState>,
    ) {
        if !ready.load(Ordering::SeqCst) && batch.len() >= expected_checkpoints {
            info!(
                "catalog caught up with {} persisted downloads, selector unlocked",
                batch.len()
            );
            ready.store(true, Ordering::SeqCst);
        }

        {
            let mut latest = latest.write().await;
            latest.clear();
            for state in &batch {
                latest.insert(state.snapshot.infohash, state.clone());
            }
        }

        let recheck = catalog.write().await.apply_states(&batch);
        metrics::CATALOG_SIZE.set(catalog.read().await.len() as i64);

        for handle in recheck {
            debug!("forcing recheck of {}", handle.infohash());
            if let Err(e) = handle.force_recheck().await {
                warn!("recheck failed for {}: {}", handle.infohash(), e);
            }
        }
    }

    /// Process one discovery announcement end to end.
    async fn handle_discovery(
        catalog: &RwLock<Catalog>,
        latest: &RwLock<HashMap<InfoHash, DownloadState>>,
        engine: &Arc<dyn TorrentEngine>,
        config: &MinerConfig,
        event: DiscoveryEvent,
    ) {
        metrics::DISCOVERIES_TOTAL
            .with_label_values(&[event.source.kind()])
            .inc();

        let engine_known = latest.read().await.contains_key(&event.infohash)
            || engine.checkpoint_exists(&event.infohash);

        let admission = catalog.write().await.admit(
            event.source,
            event.infohash,
            event.name.clone(),
            engine_known,
        );

        match admission {
            Admission::New => {
                metrics::CATALOG_SIZE.set(catalog.read().await.len() as i64);
                let request =
                    AddDownloadRequest::new(event.infohash, event.name, config.save_path.clone())
                        .with_hops(config.hops);
                match engine.add(request).await {
                    Ok(_) => {
                        // The handle attaches when the engine reports
                        // the download through the state channel.
                        metrics::TORRENTS_ADDED.inc();
                        debug!("requested engine add for {}", event.infohash);
                    }
                    Err(e) => {
                        metrics::ADD_FAILURES.with_label_values(&[e.kind()]).inc();
                        warn!("engine add failed for {}: {}", event.infohash, e);
                    }
                }
                catalog.write().await.mark_add_resolved(&event.infohash);
            }
            Admission::KnownSource => {
                debug!("{} gained a source", event.infohash);
            }
            Admission::AtCapacity | Admission::EngineOwned => {}
        }
    }

    /// One selector pass: snapshot, plan, execute, report.
    async fn selector_tick(
        catalog: &RwLock<Catalog>,
        latest: &RwLock<HashMap<InfoHash, DownloadState>>,
        engine: &Arc<dyn TorrentEngine>,
        policies: &[Arc<dyn Policy>],
        config: &MinerConfig,
    ) {
        metrics::SELECTOR_TICKS.inc();

        let loaded: Vec<MinedTorrent> = catalog
            .read()
            .await
            .snapshot()
            .into_iter()
            .filter(MinedTorrent::is_loaded)
            .collect();
        let all_downloads: Vec<StateSnapshot> = latest
            .read()
            .await
            .values()
            .map(|state| state.snapshot.clone())
            .collect();

        let plan = plan_selection(
            &loaded,
            &all_downloads,
            policies,
            config.max_torrents_active,
            config.max_disk_space_bytes,
        );
        Self::execute_plan(catalog, engine, &loaded, plan).await;
    }

    async fn execute_plan(
        catalog: &RwLock<Catalog>,
        engine: &Arc<dyn TorrentEngine>,
        loaded: &[MinedTorrent],
        plan: SelectionPlan,
    ) {
        let handles: HashMap<InfoHash, Arc<dyn DownloadHandle>> = loaded
            .iter()
            .filter_map(|t| t.handle.clone().map(|h| (t.infohash, h)))
            .collect();

        for infohash in &plan.start {
            let Some(handle) = handles.get(infohash) else {
                continue;
            };
            info!("starting torrent {}", infohash);
            metrics::TORRENTS_STARTED.inc();
            if let Err(e) = handle.start().await {
                warn!("start failed for {}: {}", infohash, e);
            }
        }

        for infohash in &plan.stop {
            let Some(handle) = handles.get(infohash) else {
                continue;
            };
            info!("stopping torrent {}", infohash);
            metrics::TORRENTS_STOPPED.inc();
            if let Err(e) = handle.stop().await {
                warn!("stop failed for {}: {}", infohash, e);
            }
        }

        for infohash in &plan.evict {
            info!("removing torrent {}", infohash);
            metrics::TORRENTS_REMOVED.inc();
            let entry = catalog.write().await.remove(infohash);
            if let Some(handle) = entry.and_then(|e| e.handle) {
                if let Err(e) = engine.remove(handle, true).await {
                    warn!("remove failed for {}: {}", infohash, e);
                }
            }
        }
        metrics::CATALOG_SIZE.set(catalog.read().await.len() as i64);

        info!(
            "selector: started={} stopped={}",
            plan.start.len(),
            plan.stop.len()
        );
    }

    /// One governor pass: read free space, react to crossings.
    async fn governor_tick(
        governor: &Mutex<DiskGovernor>,
        latest: &RwLock<HashMap<InfoHash, DownloadState>>,
        engine: &Arc<dyn TorrentEngine>,
        save_path: &Path,
    ) {
        let free = match engine.free_disk_bytes(save_path) {
            Ok(free) => free,
            Err(e) => {
                warn!("free disk query failed: {}", e);
                return;
            }
        };
        metrics::FREE_DISK_BYTES.set(free.min(i64::MAX as u64) as i64);

        let Some(mode) = governor.lock().await.observe(free) else {
            return;
        };

        info!("governor: upload_only={}", mode);
        metrics::UPLOAD_ONLY_TOGGLES
            .with_label_values(&[if mode { "on" } else { "off" }])
            .inc();

        let handles: Vec<Arc<dyn DownloadHandle>> = latest
            .read()
            .await
            .values()
            .filter(|state| state.snapshot.mining_owned)
            .map(|state| Arc::clone(&state.handle))
            .collect();
        for handle in handles {
            if let Err(e) = handle.set_upload_only(mode).await {
                warn!(
                    "upload-only toggle failed for {}: {}",
                    handle.infohash(),
                    e
                );
            }
        }
    }
}

fn ensure_save_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Pre-existing `<infohash>.state` files in the engine's state dir; the
/// ready latch waits for the engine to report this many downloads.
fn count_checkpoints(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map_or(false, |ext| ext == "state")
            })
            .count(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> MinerConfig {
        MinerConfig {
            save_path: dir.path().join("mined"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_creates_save_path() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let engine = Arc::new(MockEngine::new());

        let _scheduler = SwarmScheduler::new(engine, config.clone()).unwrap();
        assert!(config.save_path.is_dir());
    }

    #[tokio::test]
    async fn test_duplicate_source_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let scheduler = SwarmScheduler::new(engine, test_config(&dir)).unwrap();

        let source = Arc::new(crate::source::DirectorySource::new(
            dir.path().join("watch"),
            Duration::from_secs(300),
        ));
        scheduler.add_source(source.clone()).await.unwrap();

        let dup = Arc::new(crate::source::DirectorySource::new(
            dir.path().join("watch"),
            Duration::from_secs(300),
        ));
        let err = scheduler.add_source(dup).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateSource(_)));

        scheduler.shutdown(false).await;
    }

    #[tokio::test]
    async fn test_remove_unknown_source_fails() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let scheduler = SwarmScheduler::new(engine, test_config(&dir)).unwrap();

        let err = scheduler
            .remove_source(&SourceId::Rss("http://nowhere".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownSource(_)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let scheduler = SwarmScheduler::new(engine, test_config(&dir)).unwrap();

        scheduler.start().await;
        assert!(scheduler.status().await.running);

        scheduler.shutdown(false).await;
        assert!(!scheduler.status().await.running);
        // A second shutdown returns immediately.
        scheduler.shutdown(false).await;
    }

    #[test]
    fn test_count_checkpoints() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(format!("{}.state", "aa".repeat(20))), b"").unwrap();
        std::fs::write(dir.path().join(format!("{}.state", "bb".repeat(20))), b"").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"").unwrap();

        assert_eq!(count_checkpoints(dir.path()), 2);
        assert_eq!(count_checkpoints(Path::new("/nonexistent")), 0);
    }
}
