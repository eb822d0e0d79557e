//! Mock channel overlay for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::source::{ChannelOverlay, ChannelTorrent, OverlayError};

/// Mock implementation of the `ChannelOverlay` trait.
///
/// Joins can be scripted to fail with `NotFound` a number of times
/// before succeeding, and the torrent list per channel is settable at
/// any point.
#[derive(Debug, Default)]
pub struct MockChannelOverlay {
    torrents: RwLock<HashMap<[u8; 20], Vec<ChannelTorrent>>>,
    remaining_join_failures: RwLock<usize>,
    join_attempts: RwLock<usize>,
}

impl MockChannelOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the torrent list the overlay reports for a channel.
    pub async fn set_torrents(&self, channel: [u8; 20], torrents: Vec<ChannelTorrent>) {
        self.torrents.write().await.insert(channel, torrents);
    }

    /// Make the next `count` join attempts fail with `NotFound`.
    pub async fn fail_joins(&self, count: usize) {
        *self.remaining_join_failures.write().await = count;
    }

    /// Total join attempts observed.
    pub async fn join_attempts(&self) -> usize {
        *self.join_attempts.read().await
    }
}

#[async_trait]
impl ChannelOverlay for MockChannelOverlay {
    async fn join(&self, _channel: &[u8; 20]) -> Result<(), OverlayError> {
        *self.join_attempts.write().await += 1;
        let mut failures = self.remaining_join_failures.write().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(OverlayError::NotFound);
        }
        Ok(())
    }

    async fn list_torrents(
        &self,
        channel: &[u8; 20],
    ) -> Result<Vec<ChannelTorrent>, OverlayError> {
        Ok(self
            .torrents
            .read()
            .await
            .get(channel)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InfoHash;

    #[tokio::test]
    async fn test_scripted_join_failures() {
        let overlay = MockChannelOverlay::new();
        overlay.fail_joins(2).await;
        let channel = [0u8; 20];

        assert!(matches!(
            overlay.join(&channel).await,
            Err(OverlayError::NotFound)
        ));
        assert!(matches!(
            overlay.join(&channel).await,
            Err(OverlayError::NotFound)
        ));
        assert!(overlay.join(&channel).await.is_ok());
        assert_eq!(overlay.join_attempts().await, 3);
    }

    #[tokio::test]
    async fn test_unknown_channel_lists_empty() {
        let overlay = MockChannelOverlay::new();
        assert!(overlay.list_torrents(&[1; 20]).await.unwrap().is_empty());

        overlay
            .set_torrents(
                [1; 20],
                vec![ChannelTorrent {
                    infohash: InfoHash::new([9; 20]),
                    name: "nine".to_string(),
                    collected: true,
                }],
            )
            .await;
        assert_eq!(overlay.list_torrents(&[1; 20]).await.unwrap().len(), 1);
    }
}
