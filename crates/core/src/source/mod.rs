//! Torrent discovery sources.
//!
//! A `Source` watches some venue (a p2p channel, an RSS feed, a
//! directory) and announces `(infohash, name)` events through a
//! non-blocking callback. Shared lifecycle concerns live in
//! `SourceLifecycle` rather than a base type.

mod channel;
mod directory;
mod metainfo;
mod rss;
mod types;

pub use channel::{ChannelOverlay, ChannelSource, ChannelTorrent, OverlayError};
pub use directory::DirectorySource;
pub use metainfo::{parse_metainfo, MetainfoError, ParsedTorrent};
pub use rss::RssSource;
pub use types::{DiscoveryCallback, Source, SourceId};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

use crate::config::SourceEntry;
use crate::scheduler::MinerConfig;

/// Build a source from a configuration entry.
///
/// Channel sources need a live overlay instance and are constructed
/// programmatically instead.
pub fn from_entry(entry: &SourceEntry, config: &MinerConfig) -> Arc<dyn Source> {
    let interval = Duration::from_secs(config.source_interval_secs);
    match entry {
        SourceEntry::Rss { url } => {
            Arc::new(RssSource::new(url.clone(), config.save_path.clone(), interval))
        }
        SourceEntry::Directory { path } => Arc::new(DirectorySource::new(path.clone(), interval)),
    }
}

/// Start/stop bookkeeping shared by all sources: a running flag plus a
/// broadcast shutdown signal for the spawned loop.
#[derive(Debug)]
pub(crate) struct SourceLifecycle {
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SourceLifecycle {
    pub(crate) fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Transition to running. Returns the shutdown receiver for the
    /// loop, or `None` if the source was already running.
    pub(crate) fn begin(&self, id: &SourceId) -> Option<broadcast::Receiver<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("source {} already running", id);
            return None;
        }
        Some(self.shutdown_tx.subscribe())
    }

    /// Signal the loop to exit and clear the running flag.
    pub(crate) fn end(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_lifecycle_begin_once() {
        let lifecycle = SourceLifecycle::new();
        let id = SourceId::Directory(PathBuf::from("/watch"));

        assert!(lifecycle.begin(&id).is_some());
        assert!(lifecycle.begin(&id).is_none());

        lifecycle.end();
        assert!(lifecycle.begin(&id).is_some());
    }

    #[test]
    fn test_from_entry_builds_matching_source() {
        let config = MinerConfig::default();

        let rss = from_entry(
            &SourceEntry::Rss {
                url: "http://example.com/feed.xml".to_string(),
            },
            &config,
        );
        assert!(matches!(rss.id(), SourceId::Rss(_)));

        let dir = from_entry(
            &SourceEntry::Directory {
                path: PathBuf::from("/watch"),
            },
            &config,
        );
        assert!(matches!(dir.id(), SourceId::Directory(_)));
    }
}
