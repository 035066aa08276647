use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

use crate::record::ChecksumRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedChecksum {
    pub id: u64,
    pub crc32: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SubchunkCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Read-only key to checksum index taken at pipeline start. Shared by the
/// fetch stage; never mutated after construction.
#[derive(Debug, Default)]
pub struct SubchunkCache {
    entries: HashMap<Vec<u8>, CachedChecksum>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SubchunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records only; records without an id are ignored.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ChecksumRecord>) -> Self {
        let entries = records
            .into_iter()
            .filter_map(|r| {
                r.id.map(|id| {
                    (
                        r.level_db_key.clone(),
                        CachedChecksum {
                            id,
                            crc32: r.crc32,
                        },
                    )
                })
            })
            .collect();
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<CachedChecksum> {
        let hit = self.entries.get(key).copied();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// True when `key` is stored with exactly `crc32`.
    pub fn is_unchanged(&self, key: &[u8], crc32: u32) -> bool {
        self.get(key).is_some_and(|c| c.crc32 == crc32)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SubchunkCacheStats {
        SubchunkCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
