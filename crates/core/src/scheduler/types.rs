//! Types for the mining scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{EngineError, InfoHash};
use crate::source::SourceId;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A source with the same identity is already registered.
    #[error("duplicate source: {0}")]
    DuplicateSource(SourceId),

    /// No source with this identity is registered.
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    /// Filesystem error (save path creation, checkpoint listing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine operation failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the control loops are running.
    pub running: bool,
    /// Whether the catalog has caught up with persisted engine state;
    /// the selector idles until this is set.
    pub ready: bool,
    /// Total catalog entries.
    pub catalog_size: usize,
    /// Catalog entries the engine currently tracks.
    pub loaded_count: usize,
    /// Registered sources.
    pub source_count: usize,
    /// Whether low disk space has forced upload-only mode.
    pub upload_only: bool,
}

/// A discovery announcement queued for the scheduler's drain loop.
#[derive(Debug, Clone)]
pub(crate) struct DiscoveryEvent {
    pub source: SourceId,
    pub infohash: InfoHash,
    pub name: String,
}
