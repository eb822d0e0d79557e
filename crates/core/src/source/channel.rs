//! Channel discovery source: announces torrents observed on a
//! peer-to-peer channel overlay.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{DiscoveryCallback, Source, SourceId};
use super::SourceLifecycle;
use crate::engine::InfoHash;

/// Wait between join attempts while the channel is not yet findable.
const JOIN_RETRY_DELAY: Duration = Duration::from_secs(15);
/// Wait between polls while uncollected torrents are pending.
const PENDING_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Errors from the channel overlay.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("channel not found")]
    NotFound,

    #[error("overlay error: {0}")]
    Internal(String),
}

/// A torrent as listed by the overlay. `collected` is false while the
/// overlay has seen the torrent announced but not yet fetched its
/// metadata locally.
#[derive(Debug, Clone)]
pub struct ChannelTorrent {
    pub infohash: InfoHash,
    pub name: String,
    pub collected: bool,
}

/// The external channel-discovery overlay the source polls.
#[async_trait]
pub trait ChannelOverlay: Send + Sync {
    /// Join a channel. `NotFound` means the channel is not (yet)
    /// discoverable and the caller should retry.
    async fn join(&self, channel: &[u8; 20]) -> Result<(), OverlayError>;

    /// Torrents currently known on a joined channel.
    async fn list_torrents(&self, channel: &[u8; 20])
        -> Result<Vec<ChannelTorrent>, OverlayError>;
}

/// Announces torrents observed on one channel of the overlay.
pub struct ChannelSource {
    channel: [u8; 20],
    overlay: Arc<dyn ChannelOverlay>,
    interval: Duration,
    lifecycle: SourceLifecycle,
}

impl ChannelSource {
    pub fn new(channel: [u8; 20], overlay: Arc<dyn ChannelOverlay>, interval: Duration) -> Self {
        Self {
            channel,
            overlay,
            interval,
            lifecycle: SourceLifecycle::new(),
        }
    }

    /// One poll pass. Collected torrents are announced once; the rest
    /// are parked in `pending` so the loop retries them on the short
    /// cadence.
    async fn poll(
        id: &SourceId,
        channel: &[u8; 20],
        overlay: &Arc<dyn ChannelOverlay>,
        emitted: &mut HashSet<InfoHash>,
        pending: &mut HashMap<InfoHash, String>,
        on_discovered: &DiscoveryCallback,
    ) {
        let torrents = match overlay.list_torrents(channel).await {
            Ok(torrents) => torrents,
            Err(e) => {
                warn!("source {}: list failed: {}", id, e);
                return;
            }
        };

        for torrent in torrents {
            if emitted.contains(&torrent.infohash) {
                continue;
            }
            if torrent.collected {
                pending.remove(&torrent.infohash);
                emitted.insert(torrent.infohash);
                on_discovered(id.clone(), torrent.infohash, torrent.name);
            } else if pending
                .insert(torrent.infohash, torrent.name)
                .is_none()
            {
                debug!("source {}: {} not collected yet", id, torrent.infohash);
            }
        }
    }
}

#[async_trait]
impl Source for ChannelSource {
    fn id(&self) -> SourceId {
        SourceId::Channel(self.channel)
    }

    async fn start(&self, on_discovered: DiscoveryCallback) {
        let id = self.id();
        let Some(mut shutdown_rx) = self.lifecycle.begin(&id) else {
            return;
        };

        let channel = self.channel;
        let overlay = Arc::clone(&self.overlay);
        let interval = self.interval;

        tokio::spawn(async move {
            // Join first; an unknown channel id is retried indefinitely
            // until the overlay finds it or the source is stopped.
            loop {
                match overlay.join(&channel).await {
                    Ok(()) => break,
                    Err(OverlayError::NotFound) => {
                        debug!("source {}: channel not found, retrying", id);
                    }
                    Err(e) => {
                        warn!("source {}: join failed: {}", id, e);
                    }
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = tokio::time::sleep(JOIN_RETRY_DELAY) => {}
                }
            }

            let mut emitted = HashSet::new();
            let mut pending = HashMap::new();
            loop {
                Self::poll(
                    &id,
                    &channel,
                    &overlay,
                    &mut emitted,
                    &mut pending,
                    &on_discovered,
                )
                .await;

                let delay = if pending.is_empty() {
                    interval
                } else {
                    PENDING_RETRY_DELAY
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
    }

    async fn stop(&self) {
        self.lifecycle.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannelOverlay;
    use std::sync::Mutex as StdMutex;

    fn collecting_callback() -> (DiscoveryCallback, Arc<StdMutex<Vec<(InfoHash, String)>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cb: DiscoveryCallback = Arc::new(move |_, hash, name| {
            sink.lock().unwrap().push((hash, name));
        });
        (cb, events)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..120 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        condition()
    }

    #[tokio::test(start_paused = true)]
    async fn test_collected_torrents_are_announced_once() {
        let channel = [0x11; 20];
        let overlay = Arc::new(MockChannelOverlay::new());
        overlay
            .set_torrents(
                channel,
                vec![ChannelTorrent {
                    infohash: InfoHash::new([1; 20]),
                    name: "one".to_string(),
                    collected: true,
                }],
            )
            .await;

        let source = ChannelSource::new(channel, overlay, Duration::from_secs(1));
        let (cb, events) = collecting_callback();
        source.start(cb).await;

        assert!(wait_for(|| !events.lock().unwrap().is_empty()).await);

        // Let a few more polls run; the announcement stays single.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(events.lock().unwrap()[0].1, "one");

        source.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_not_found_is_retried() {
        let channel = [0x22; 20];
        let overlay = Arc::new(MockChannelOverlay::new());
        overlay.fail_joins(3).await;
        overlay
            .set_torrents(
                channel,
                vec![ChannelTorrent {
                    infohash: InfoHash::new([2; 20]),
                    name: "late".to_string(),
                    collected: true,
                }],
            )
            .await;

        let source = ChannelSource::new(channel, overlay.clone(), Duration::from_secs(1));
        let (cb, events) = collecting_callback();
        source.start(cb).await;

        assert!(wait_for(|| !events.lock().unwrap().is_empty()).await);
        assert!(overlay.join_attempts().await >= 4);

        source.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncollected_torrent_pends_until_resolved() {
        let channel = [0x33; 20];
        let hash = InfoHash::new([3; 20]);
        let overlay = Arc::new(MockChannelOverlay::new());
        overlay
            .set_torrents(
                channel,
                vec![ChannelTorrent {
                    infohash: hash,
                    name: "pending".to_string(),
                    collected: false,
                }],
            )
            .await;

        // Long interval: only the pending retry cadence can resolve it.
        let source = ChannelSource::new(channel, overlay.clone(), Duration::from_secs(600));
        let (cb, events) = collecting_callback();
        source.start(cb).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(events.lock().unwrap().is_empty());

        overlay
            .set_torrents(
                channel,
                vec![ChannelTorrent {
                    infohash: hash,
                    name: "pending".to_string(),
                    collected: true,
                }],
            )
            .await;

        assert!(wait_for(|| !events.lock().unwrap().is_empty()).await);
        assert_eq!(events.lock().unwrap()[0].0, hash);

        source.stop().await;
    }
}
