//! BitTorrent engine adapter.
//!
//! This module provides the `TorrentEngine` and `DownloadHandle` traits
//! the scheduler drives an external engine through. The engine itself
//! (piece exchange, DHT, trackers) is an external collaborator; only
//! its narrow surface is modeled here.

mod types;

pub use types::*;
