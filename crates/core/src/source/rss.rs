//! RSS discovery source: polls a feed and resolves items to torrents.
//!
//! Each item URL gets a stable stand-in identifier, `SHA1(item_url)`,
//! which names a local cache file `rss-<hex>.torrent` under the save
//! path. The real infohash only exists once the `.torrent` body has
//! been fetched and parsed; the stand-in never leaves this module.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::metainfo::parse_metainfo;
use super::types::{DiscoveryCallback, Source, SourceId};
use super::SourceLifecycle;
use crate::engine::InfoHash;

const USER_AGENT: &str = concat!("seedmine/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait before the single retry on HTTP 503.
const RETRY_503_DELAY: Duration = Duration::from_secs(10);

/// Polls an RSS feed, fetches `.torrent` payloads for its items, and
/// announces their real infohashes.
#[derive(Debug)]
pub struct RssSource {
    url: String,
    save_path: PathBuf,
    interval: Duration,
    http: reqwest::Client,
    lifecycle: SourceLifecycle,
    /// Infohashes already announced by this instance.
    emitted: Arc<Mutex<HashSet<InfoHash>>>,
}

impl RssSource {
    pub fn new(url: impl Into<String>, save_path: impl Into<PathBuf>, interval: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            save_path: save_path.into(),
            interval,
            http,
            lifecycle: SourceLifecycle::new(),
            emitted: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Cache filename for an item URL: `rss-<hex(sha1(url))>.torrent`.
    fn cache_file_name(item_url: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(item_url.as_bytes());
        format!("rss-{}.torrent", hex::encode(hasher.finalize()))
    }

    /// One poll pass: fetch the feed and resolve every item.
    async fn tick(
        id: &SourceId,
        url: &str,
        save_path: &Path,
        http: &reqwest::Client,
        emitted: &Mutex<HashSet<InfoHash>>,
        on_discovered: &DiscoveryCallback,
    ) {
        let body = match http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("source {}: failed to read feed body: {}", id, e);
                    return;
                }
            },
            Ok(resp) => {
                warn!("source {}: feed returned HTTP {}", id, resp.status());
                return;
            }
            Err(e) => {
                warn!("source {}: feed fetch failed: {}", id, e);
                return;
            }
        };

        let channel = match rss::Channel::read_from(&body[..]) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("source {}: feed parse failed: {}", id, e);
                return;
            }
        };

        Self::process_feed(id, &channel, save_path, http, emitted, on_discovered).await;
    }

    /// Resolve every item of an already-parsed feed.
    async fn process_feed(
        id: &SourceId,
        channel: &rss::Channel,
        save_path: &Path,
        http: &reqwest::Client,
        emitted: &Mutex<HashSet<InfoHash>>,
        on_discovered: &DiscoveryCallback,
    ) {
        for item in channel.items() {
            let Some(item_url) = item
                .enclosure()
                .map(|e| e.url())
                .or_else(|| item.link())
            else {
                continue;
            };
            let title = item.title().unwrap_or(item_url).to_string();

            if let Err(e) =
                Self::process_item(id, item_url, &title, save_path, http, emitted, on_discovered)
                    .await
            {
                // One bad item never fails the feed; the next poll
                // retries anything uncached.
                warn!("source {}: dropping item {}: {}", id, item_url, e);
            }
        }
    }

    /// Resolve one item to its real infohash, going through the local
    /// cache file before the network.
    async fn process_item(
        id: &SourceId,
        item_url: &str,
        title: &str,
        save_path: &Path,
        http: &reqwest::Client,
        emitted: &Mutex<HashSet<InfoHash>>,
        on_discovered: &DiscoveryCallback,
    ) -> Result<(), String> {
        let cache_path = save_path.join(Self::cache_file_name(item_url));

        let bytes = if cache_path.is_file() {
            tokio::fs::read(&cache_path)
                .await
                .map_err(|e| format!("cache read failed: {}", e))?
        } else {
            let bytes = Self::fetch_torrent(http, item_url).await?;
            // Validate before writing so the cache only ever holds
            // parseable torrents.
            parse_metainfo(&bytes).map_err(|e| e.to_string())?;
            if let Err(e) = tokio::fs::write(&cache_path, &bytes).await {
                warn!("source {}: cache write failed for {}: {}", id, item_url, e);
            }
            bytes
        };

        let parsed = parse_metainfo(&bytes).map_err(|e| e.to_string())?;

        let mut emitted = emitted.lock().await;
        if !emitted.insert(parsed.infohash) {
            debug!("source {}: already announced {}", id, parsed.infohash);
            return Ok(());
        }
        drop(emitted);

        on_discovered(id.clone(), parsed.infohash, title.to_string());
        Ok(())
    }

    /// GET a `.torrent` payload; a 503 is retried once after a delay.
    async fn fetch_torrent(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
        for attempt in 0..2 {
            let resp = http
                .get(url)
                .send()
                .await
                .map_err(|e| format!("fetch failed: {}", e))?;

            if resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE && attempt == 0 {
                debug!("got 503 for {}, retrying once", url);
                tokio::time::sleep(RETRY_503_DELAY).await;
                continue;
            }
            if !resp.status().is_success() {
                return Err(format!("HTTP {}", resp.status()));
            }
            return resp
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| format!("body read failed: {}", e));
        }
        Err("HTTP 503".to_string())
    }
}

#[async_trait]
impl Source for RssSource {
    fn id(&self) -> SourceId {
        SourceId::Rss(self.url.clone())
    }

    async fn start(&self, on_discovered: DiscoveryCallback) {
        let id = self.id();
        let Some(mut shutdown_rx) = self.lifecycle.begin(&id) else {
            return;
        };

        let url = self.url.clone();
        let save_path = self.save_path.clone();
        let http = self.http.clone();
        let interval = self.interval;
        let emitted = Arc::clone(&self.emitted);

        tokio::spawn(async move {
            loop {
                Self::tick(&id, &url, &save_path, &http, &emitted, &on_discovered).await;
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
