//! World keys, blocks, chunk columns, tile grouping and the key-value store seam.
#![forbid(unsafe_code)]

pub mod block;
pub mod chunk;
pub mod group;
pub mod key;
pub mod store;

pub use block::{AIR_ID, BlockRecord, BlockValue};
pub use chunk::{BlockColumn, CHUNK_WIDTH, ChunkData, ColumnEntry};
pub use group::{ChunkBounds, ChunkKeys, TileGroup, collect_subchunk_keys, group_subchunks};
pub use key::{Dimension, KeyError, KeyType, WILDCARD_SUB_INDEX, WorldKey, grouped_coordinate, pack_xz, unpack_xz};
pub use store::{DirStore, MemoryStore, StoreError, WorldStore};
