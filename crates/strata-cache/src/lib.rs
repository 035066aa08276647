//! Subchunk checksum index and its JSON-file store.
#![forbid(unsafe_code)]

pub mod db;
pub mod record;
pub mod snapshot;

use std::fmt;
use std::io;

pub use db::{ChecksumStore, JsonChecksumDb};
pub use record::{ChecksumRecord, SettingsRow};
pub use snapshot::{CachedChecksum, SubchunkCache, SubchunkCacheStats};

/// Live checksum database.
pub const DB_FILE: &str = "chunks.json";
/// Scratch copy written during an incremental run.
pub const UPDATE_DB_FILE: &str = "chunks-update.json";

/// File name of the backup taken when promoting a scratch database.
pub fn backup_file_name(timestamp: &str) -> String {
    format!("chunks-backup-{}.json", timestamp)
}

#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    Json(serde_json::Error),
    UnsupportedVersion(u32),
    MissingId,
    UnknownId(u64),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "checksum db i/o error: {}", e),
            CacheError::Json(e) => write!(f, "checksum db is not valid json: {}", e),
            CacheError::UnsupportedVersion(v) => {
                write!(f, "checksum db format version {} is newer than supported", v)
            }
            CacheError::MissingId => f.write_str("update of a checksum record without id"),
            CacheError::UnknownId(id) => write!(f, "no checksum record with id {}", id),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(e) => Some(e),
            CacheError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        CacheError::Io(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Json(e)
    }
}
