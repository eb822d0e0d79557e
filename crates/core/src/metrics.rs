//! Prometheus metrics for the mining scheduler.
//!
//! This module provides metrics for:
//! - Discovery (announcements per source kind, engine adds/failures)
//! - Selection (ticks, starts, stops, removals)
//! - Disk governance (upload-only toggles, free space)

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Discovery
// =============================================================================

/// Discovery announcements total by source kind.
pub static DISCOVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedmine_discoveries_total",
            "Total discovery announcements received",
        ),
        &["source"], // "channel", "rss", "directory"
    )
    .unwrap()
});

/// Engine adds requested for newly admitted torrents.
pub static TORRENTS_ADDED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seedmine_torrents_added_total",
        "Total engine adds requested",
    )
    .unwrap()
});

/// Failed engine adds by error kind.
pub static ADD_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedmine_add_failures_total", "Total failed engine adds"),
        &["reason"], // "already_exists", "io", "not_found", "internal"
    )
    .unwrap()
});

// =============================================================================
// Selection
// =============================================================================

/// Selector passes executed.
pub static SELECTOR_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("seedmine_selector_ticks_total", "Total selector passes").unwrap()
});

/// Torrent starts issued by the selector.
pub static TORRENTS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("seedmine_torrents_started_total", "Total torrent starts").unwrap()
});

/// Torrent stops issued by the selector.
pub static TORRENTS_STOPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("seedmine_torrents_stopped_total", "Total torrent stops").unwrap()
});

/// Torrents removed from the engine (dead swarms, source removal,
/// shutdown cleanup).
pub static TORRENTS_REMOVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("seedmine_torrents_removed_total", "Total torrent removals").unwrap()
});

/// Current catalog size.
pub static CATALOG_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("seedmine_catalog_size", "Current mined-torrent catalog size").unwrap()
});

// =============================================================================
// Disk governance
// =============================================================================

/// Upload-only transitions by direction.
pub static UPLOAD_ONLY_TOGGLES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedmine_upload_only_toggles_total",
            "Total upload-only mode transitions",
        ),
        &["mode"], // "on", "off"
    )
    .unwrap()
});

/// Last observed free bytes under the save path.
pub static FREE_DISK_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seedmine_free_disk_bytes",
        "Free bytes on the filesystem holding the save path",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Discovery
        Box::new(DISCOVERIES_TOTAL.clone()),
        Box::new(TORRENTS_ADDED.clone()),
        Box::new(ADD_FAILURES.clone()),
        // Selection
        Box::new(SELECTOR_TICKS.clone()),
        Box::new(TORRENTS_STARTED.clone()),
        Box::new(TORRENTS_STOPPED.clone()),
        Box::new(TORRENTS_REMOVED.clone()),
        Box::new(CATALOG_SIZE.clone()),
        // Disk governance
        Box::new(UPLOAD_ONLY_TOGGLES.clone()),
        Box::new(FREE_DISK_BYTES.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
    }
}
