//! Scheduler configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the mining scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Cap on concurrently running mined torrents.
    #[serde(default = "default_max_active")]
    pub max_torrents_active: usize,

    /// Cap on catalog size; announcements beyond it are dropped.
    #[serde(default = "default_max_listed")]
    pub max_torrents_listed: usize,

    /// How often the selector recomputes the running set (seconds).
    #[serde(default = "default_select_interval")]
    pub select_interval_secs: u64,

    /// How often the governor checks free disk space (seconds).
    #[serde(default = "default_disk_check_interval")]
    pub disk_check_interval_secs: u64,

    /// How often sources poll their venue (seconds).
    #[serde(default = "default_source_interval")]
    pub source_interval_secs: u64,

    /// Anonymization hops passed to the engine on add.
    #[serde(default = "default_hops")]
    pub hops: u32,

    /// Aggregate cap on bytes scheduled to download.
    #[serde(default = "default_max_disk_space")]
    pub max_disk_space_bytes: u64,

    /// Free-space threshold below which mining goes upload-only.
    #[serde(default = "default_low_disk_space")]
    pub low_disk_space_bytes: u64,

    /// Directory mined content is stored in; created if absent.
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
}

fn default_max_active() -> usize {
    8
}

fn default_max_listed() -> usize {
    100
}

fn default_select_interval() -> u64 {
    600 // 10 minutes
}

fn default_disk_check_interval() -> u64 {
    30
}

fn default_source_interval() -> u64 {
    300 // 5 minutes
}

fn default_hops() -> u32 {
    1
}

fn default_max_disk_space() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

fn default_low_disk_space() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_save_path() -> PathBuf {
    PathBuf::from("./mined")
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            max_torrents_active: default_max_active(),
            max_torrents_listed: default_max_listed(),
            select_interval_secs: default_select_interval(),
            disk_check_interval_secs: default_disk_check_interval(),
            source_interval_secs: default_source_interval(),
            hops: default_hops(),
            max_disk_space_bytes: default_max_disk_space(),
            low_disk_space_bytes: default_low_disk_space(),
            save_path: default_save_path(),
        }
    }
}
