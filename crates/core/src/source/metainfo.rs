//! Metainfo parsing for `.torrent` payloads.
//!
//! Uses librqbit-core to bdecode the data, validate it as a torrent,
//! and extract the real infohash and display name.

use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use thiserror::Error;

use crate::engine::InfoHash;

/// Errors that can occur when parsing `.torrent` data.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("failed to parse torrent: {0}")]
    Parse(String),

    #[error("invalid infohash in torrent: {0}")]
    InvalidHash(String),
}

/// The fields the scheduler needs out of a `.torrent` file.
#[derive(Debug, Clone)]
pub struct ParsedTorrent {
    pub infohash: InfoHash,
    /// Name from the info dictionary, if present and decodable.
    pub name: Option<String>,
}

/// Parse raw `.torrent` bytes into the real infohash and name.
pub fn parse_metainfo(bytes: &[u8]) -> Result<ParsedTorrent, MetainfoError> {
    let torrent: TorrentMetaV1Owned =
        torrent_from_bytes(bytes).map_err(|e| MetainfoError::Parse(e.to_string()))?;

    let hex = torrent.info_hash.as_string();
    let infohash = InfoHash::from_hex(&hex).map_err(|_| MetainfoError::InvalidHash(hex))?;

    let name = torrent
        .info
        .name
        .as_ref()
        .map(|b| bytes_to_string(b.as_ref()));

    Ok(ParsedTorrent { infohash, name })
}

/// Convert bytes to a UTF-8 string, falling back to lossy conversion.
fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
