use std::collections::BTreeMap;

use crate::key::{WorldKey, grouped_coordinate, pack_xz};
use crate::store::{StoreError, WorldStore};

/// Inclusive chunk-coordinate rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl ChunkBounds {
    pub fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            max_x: min_x.max(max_x),
            min_z: min_z.min(max_z),
            max_z: min_z.max(max_z),
        }
    }

    #[inline]
    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }

    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a WorldKey>) -> Option<Self> {
        let mut it = keys.into_iter();
        let first = it.next()?;
        let mut b = ChunkBounds::new(first.x(), first.x(), first.z(), first.z());
        for k in it {
            b.min_x = b.min_x.min(k.x());
            b.max_x = b.max_x.max(k.x());
            b.min_z = b.min_z.min(k.z());
            b.max_z = b.max_z.max(k.z());
        }
        Some(b)
    }

    pub fn intersect(&self, other: &ChunkBounds) -> Option<ChunkBounds> {
        let b = ChunkBounds {
            min_x: self.min_x.max(other.min_x),
            max_x: self.max_x.min(other.max_x),
            min_z: self.min_z.max(other.min_z),
            max_z: self.max_z.min(other.max_z),
        };
        (b.min_x <= b.max_x && b.min_z <= b.max_z).then_some(b)
    }
}

/// Subchunk keys of one chunk column, ordered by sub-index.
#[derive(Clone, Debug)]
pub struct ChunkKeys {
    pub x: i32,
    pub z: i32,
    pub subchunks: Vec<WorldKey>,
}

/// The chunks whose subchunks render into one finest-level tile.
#[derive(Clone, Debug)]
pub struct TileGroup {
    pub origin_x: i32,
    pub origin_z: i32,
    pub group_size: i32,
    pub chunks: Vec<ChunkKeys>,
}

impl TileGroup {
    #[inline]
    pub fn tile_x(&self) -> i32 {
        self.origin_x.div_euclid(self.group_size)
    }

    #[inline]
    pub fn tile_z(&self) -> i32 {
        self.origin_z.div_euclid(self.group_size)
    }

    #[inline]
    pub fn key(&self) -> u64 {
        pack_xz(self.origin_x, self.origin_z)
    }

    pub fn subchunk_count(&self) -> usize {
        self.chunks.iter().map(|c| c.subchunks.len()).sum()
    }
}

/// Groups subchunk keys into chunk columns and the columns into tile groups.
///
/// Non-subchunk records and, when `bounds` is given, chunks outside it are ignored.
/// Output is sorted by tile origin and by chunk within each tile, so the same key
/// set always produces the same groups.
pub fn group_subchunks(
    keys: impl IntoIterator<Item = WorldKey>,
    group_size: i32,
    bounds: Option<&ChunkBounds>,
) -> Vec<TileGroup> {
    let group_size = group_size.max(1);
    let mut columns: BTreeMap<(i32, i32), Vec<WorldKey>> = BTreeMap::new();
    for key in keys {
        if !key.is_subchunk() {
            continue;
        }
        if let Some(b) = bounds {
            if !b.contains(key.x(), key.z()) {
                continue;
            }
        }
        columns.entry((key.x(), key.z())).or_default().push(key);
    }

    let mut tiles: BTreeMap<(i32, i32), Vec<ChunkKeys>> = BTreeMap::new();
    for ((x, z), mut subchunks) in columns {
        subchunks.sort_by_key(|k| k.sub_y());
        let origin = (
            grouped_coordinate(x, group_size),
            grouped_coordinate(z, group_size),
        );
        tiles
            .entry(origin)
            .or_default()
            .push(ChunkKeys { x, z, subchunks });
    }

    tiles
        .into_iter()
        .map(|((origin_x, origin_z), chunks)| TileGroup {
            origin_x,
            origin_z,
            group_size,
            chunks,
        })
        .collect()
}

/// Reads every key of the store and keeps the subchunk records of one dimension.
/// Keys that are not 10 or 14 bytes long belong to other record families
/// (players, villages, portals) and are skipped.
pub fn collect_subchunk_keys(
    store: &dyn WorldStore,
    dimension: i32,
) -> Result<Vec<WorldKey>, StoreError> {
    let mut out = Vec::new();
    for raw in store.keys()? {
        if raw.len() != 10 && raw.len() != 14 {
            continue;
        }
        let Ok(key) = WorldKey::parse(&raw) else {
            continue;
        };
        if key.is_subchunk() && key.dimension() == dimension {
            out.push(key);
        }
    }
    log::debug!("collected {} subchunk keys for dimension {}", out.len(), dimension);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;
    use crate::store::MemoryStore;

    #[test]
    fn groups_by_floored_origin() {
        let keys = vec![
            WorldKey::subchunk(0, 0, 0, 1),
            WorldKey::subchunk(0, 0, 0, 0),
            WorldKey::subchunk(1, 1, 0, 0),
            WorldKey::subchunk(-1, 0, 0, 0),
            WorldKey::subchunk(2, 0, 0, 0),
        ];
        let groups = group_subchunks(keys, 2, None);
        let origins: Vec<(i32, i32)> = groups.iter().map(|g| (g.origin_x, g.origin_z)).collect();
        assert_eq!(origins, vec![(-2, 0), (0, 0), (2, 0)]);
        let g = &groups[1];
        assert_eq!(g.chunks.len(), 2);
        assert_eq!(g.subchunk_count(), 3);
        assert_eq!(g.chunks[0].subchunks[0].sub_index(), 0);
        assert_eq!((groups[0].tile_x(), groups[0].tile_z()), (-1, 0));
    }

    #[test]
    fn skips_non_subchunk_records_and_out_of_bounds() {
        let keys = vec![
            WorldKey::new(0, 0, 0, KeyType::Data2D.byte(), 0),
            WorldKey::subchunk(0, 0, 0, 0),
            WorldKey::subchunk(50, 0, 0, 0),
        ];
        let bounds = ChunkBounds::new(-10, 10, -10, 10);
        let groups = group_subchunks(keys, 1, Some(&bounds));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].subchunk_count(), 1);
    }

    #[test]
    fn collects_only_requested_dimension() {
        let mut store = MemoryStore::new();
        store.insert(WorldKey::subchunk(1, 2, 0, 0).bytes().to_vec(), vec![1]);
        store.insert(WorldKey::subchunk(1, 2, 1, 0).bytes().to_vec(), vec![1]);
        store.insert(b"~local_player".to_vec(), vec![1]);
        let keys = collect_subchunk_keys(&store, 1).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].dimension(), 1);
    }

    #[test]
    fn bounds_from_keys_and_intersection() {
        let keys = [WorldKey::subchunk(-3, 4, 0, 0), WorldKey::subchunk(5, -1, 0, 0)];
        let b = ChunkBounds::from_keys(keys.iter()).unwrap();
        assert_eq!(b, ChunkBounds::new(-3, 5, -1, 4));
        let limited = b.intersect(&ChunkBounds::new(0, 100, 0, 100)).unwrap();
        assert_eq!(limited, ChunkBounds::new(0, 5, 0, 4));
        assert!(b.intersect(&ChunkBounds::new(50, 60, 50, 60)).is_none());
    }
}
