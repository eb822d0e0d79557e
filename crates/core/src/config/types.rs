use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scheduler::MinerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mining: MinerConfig,
    /// Sources started when the scheduler is wired up. Channel sources
    /// need a live overlay and are added programmatically instead.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// A declaratively configured discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEntry {
    Rss { url: String },
    Directory { path: PathBuf },
}
