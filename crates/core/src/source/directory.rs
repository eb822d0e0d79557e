//! Directory discovery source: watches a directory for `.torrent` files.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::metainfo::parse_metainfo;
use super::types::{DiscoveryCallback, Source, SourceId};
use super::SourceLifecycle;

/// Scans a filesystem directory for `*.torrent` files on start and at
/// every source interval, announcing each file once per instance.
#[derive(Debug)]
pub struct DirectorySource {
    path: PathBuf,
    interval: Duration,
    lifecycle: SourceLifecycle,
    /// Files already announced (or permanently unparseable) by this
    /// instance.
    seen: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            lifecycle: SourceLifecycle::new(),
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// One scan pass over the directory.
    async fn scan(
        id: &SourceId,
        path: &PathBuf,
        seen: &Mutex<HashSet<PathBuf>>,
        on_discovered: &DiscoveryCallback,
    ) {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) => {
                // Missing or unreadable directory: stay alive, retry
                // next tick, let the operator remove the source.
                warn!("source {}: cannot read directory: {}", id, e);
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let file = entry.path();
            if file.extension().map_or(true, |ext| ext != "torrent") {
                continue;
            }
            if seen.lock().await.contains(&file) {
                continue;
            }

            let bytes = match tokio::fs::read(&file).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Transient read failure; the next tick retries.
                    warn!("source {}: cannot read {}: {}", id, file.display(), e);
                    continue;
                }
            };

            match parse_metainfo(&bytes) {
                Ok(parsed) => {
                    let name = parsed.name.unwrap_or_else(|| {
                        file.file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_else(|| parsed.infohash.to_string())
                    });
                    seen.lock().await.insert(file);
                    on_discovered(id.clone(), parsed.infohash, name);
                }
                Err(e) => {
                    debug!("source {}: skipping {}: {}", id, file.display(), e);
                    // Unparseable content will not improve; remember it
                    // so the log stays quiet.
                    seen.lock().await.insert(file);
                }
            }
        }
    }
}

#[async_trait]
impl Source for DirectorySource {
    fn id(&self) -> SourceId {
        SourceId::Directory(self.path.clone())
    }

    async fn start(&self, on_discovered: DiscoveryCallback) {
        let id = self.id();
        let Some(mut shutdown_rx) = self.lifecycle.begin(&id) else {
            return;
        };

        let path = self.path.clone();
        let interval = self.interval;
        let seen = Arc::clone(&self.seen);

        tokio::spawn(async move {
            loop {
                Self::scan(&id, &path, &seen, &on_discovered).await;
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }

    async fn stop(&self) {
        self.lifecycle.end();
    }
}
