//! Types for discovery sources.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::InfoHash;

/// Identity of a discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// A peer-to-peer channel, keyed by its 20-byte public key.
    Channel([u8; 20]),
    /// An RSS feed URL.
    Rss(String),
    /// A watched filesystem directory.
    Directory(PathBuf),
}

impl SourceId {
    /// Variant name, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceId::Channel(_) => "channel",
            SourceId::Rss(_) => "rss",
            SourceId::Directory(_) => "directory",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Channel(key) => write!(f, "channel:{}", hex::encode(key)),
            SourceId::Rss(url) => write!(f, "rss:{}", url),
            SourceId::Directory(path) => write!(f, "dir:{}", path.display()),
        }
    }
}

/// Callback a source announces discovered torrents through.
///
/// Must be non-blocking relative to the source's own loop; the scheduler
/// backs it with a bounded queue.
pub type DiscoveryCallback = Arc<dyn Fn(SourceId, InfoHash, String) + Send + Sync>;

/// Trait for torrent discovery sources.
///
/// A source runs its own fetch/poll loop and emits zero or more
/// `(infohash, display_name)` events. Duplicate announcements for the
/// same infohash are idempotent downstream. A source must never crash
/// the scheduler: all fetch and parse errors are caught, logged, and
/// retried on the next tick.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identity of this source.
    fn id(&self) -> SourceId;

    /// Start the source's internal loop.
    async fn start(&self, on_discovered: DiscoveryCallback);

    /// Stop the source's internal loop.
    async fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_display() {
        assert_eq!(
            SourceId::Channel([0xab; 20]).to_string(),
            format!("channel:{}", "ab".repeat(20))
        );
        assert_eq!(
            SourceId::Rss("http://example.com/feed.xml".to_string()).to_string(),
            "rss:http://example.com/feed.xml"
        );
        assert_eq!(
            SourceId::Directory(PathBuf::from("/watch")).to_string(),
            "dir:/watch"
        );
    }

    #[test]
    fn test_source_id_equality_by_variant_and_payload() {
        assert_eq!(
            SourceId::Rss("http://a".to_string()),
            SourceId::Rss("http://a".to_string())
        );
        assert_ne!(
            SourceId::Rss("http://a".to_string()),
            SourceId::Rss("http://b".to_string())
        );
        assert_ne!(
            SourceId::Channel([0; 20]),
            SourceId::Directory(PathBuf::from("/watch"))
        );
    }
}
