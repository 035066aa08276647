use std::fmt;
use std::hash::{Hash, Hasher};

/// Sub-index carried by records that describe a whole chunk column rather than one subchunk.
/// Compares equal to every other sub-index of the same column.
pub const WILDCARD_SUB_INDEX: u8 = 0xFF;

const SHORT_KEY_LEN: usize = 10;
const LONG_KEY_LEN: usize = 14;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyType {
    Data2D,
    SubChunkPrefix,
    BlockEntity,
    Entity,
    FinalizedState,
    HardCodedSpawnAreas,
}

impl KeyType {
    #[inline]
    pub fn from_byte(b: u8) -> Option<KeyType> {
        match b {
            45 => Some(KeyType::Data2D),
            47 => Some(KeyType::SubChunkPrefix),
            49 => Some(KeyType::BlockEntity),
            50 => Some(KeyType::Entity),
            54 => Some(KeyType::FinalizedState),
            57 => Some(KeyType::HardCodedSpawnAreas),
            _ => None,
        }
    }

    #[inline]
    pub fn byte(self) -> u8 {
        match self {
            KeyType::Data2D => 45,
            KeyType::SubChunkPrefix => 47,
            KeyType::BlockEntity => 49,
            KeyType::Entity => 50,
            KeyType::FinalizedState => 54,
            KeyType::HardCodedSpawnAreas => 57,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    Overworld,
    Nether,
    End,
    Other(i32),
}

impl Dimension {
    pub fn from_id(id: i32) -> Dimension {
        match id {
            0 => Dimension::Overworld,
            1 => Dimension::Nether,
            2 => Dimension::End,
            other => Dimension::Other(other),
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Dimension::Overworld => 0,
            Dimension::Nether => 1,
            Dimension::End => 2,
            Dimension::Other(id) => id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyError {
    InvalidKeyLength(usize),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::InvalidKeyLength(len) => {
                write!(f, "invalid key length {} (expected 10 or 14 bytes)", len)
            }
        }
    }
}

impl std::error::Error for KeyError {}

/// A decoded world-store key addressing one record of one chunk column.
///
/// Equality treats [`WILDCARD_SUB_INDEX`] as matching any sub-index of the same
/// (dimension, type, x, z), and hashing leaves the sub-index out so that wildcard
/// lookups land in the same bucket.
#[derive(Clone, Debug)]
pub struct WorldKey {
    x: i32,
    z: i32,
    dimension: i32,
    record_type: u8,
    sub_index: u8,
    raw: Box<[u8]>,
}

impl WorldKey {
    pub fn parse(bytes: &[u8]) -> Result<WorldKey, KeyError> {
        let (dimension, type_at) = match bytes.len() {
            SHORT_KEY_LEN => (0, 8),
            LONG_KEY_LEN => (read_i32_le(bytes, 8), 12),
            len => return Err(KeyError::InvalidKeyLength(len)),
        };
        Ok(WorldKey {
            x: read_i32_le(bytes, 0),
            z: read_i32_le(bytes, 4),
            dimension,
            record_type: bytes[type_at],
            sub_index: bytes[type_at + 1],
            raw: bytes.into(),
        })
    }

    /// Builds a key in its canonical layout: the short form for dimension 0,
    /// the long form for every other dimension.
    pub fn new(x: i32, z: i32, dimension: i32, record_type: u8, sub_index: u8) -> WorldKey {
        let mut raw = Vec::with_capacity(LONG_KEY_LEN);
        raw.extend_from_slice(&x.to_le_bytes());
        raw.extend_from_slice(&z.to_le_bytes());
        if dimension != 0 {
            raw.extend_from_slice(&dimension.to_le_bytes());
        }
        raw.push(record_type);
        raw.push(sub_index);
        WorldKey {
            x,
            z,
            dimension,
            record_type,
            sub_index,
            raw: raw.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn subchunk(x: i32, z: i32, dimension: i32, sub_index: u8) -> WorldKey {
        WorldKey::new(x, z, dimension, KeyType::SubChunkPrefix.byte(), sub_index)
    }

    /// Wildcard key for "any subchunk of column (x, z)".
    #[inline]
    pub fn column_marker(x: i32, z: i32, dimension: i32) -> WorldKey {
        WorldKey::subchunk(x, z, dimension, WILDCARD_SUB_INDEX)
    }

    #[inline]
    pub fn x(&self) -> i32 {
        self.x
    }

    #[inline]
    pub fn z(&self) -> i32 {
        self.z
    }

    #[inline]
    pub fn dimension(&self) -> i32 {
        self.dimension
    }

    #[inline]
    pub fn record_type(&self) -> u8 {
        self.record_type
    }

    #[inline]
    pub fn key_type(&self) -> Option<KeyType> {
        KeyType::from_byte(self.record_type)
    }

    #[inline]
    pub fn sub_index(&self) -> u8 {
        self.sub_index
    }

    /// Signed vertical index of the subchunk (bedrock worlds go below zero).
    #[inline]
    pub fn sub_y(&self) -> i8 {
        self.sub_index as i8
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn is_subchunk(&self) -> bool {
        self.record_type == KeyType::SubChunkPrefix.byte()
    }

    #[inline]
    pub fn xz(&self) -> u64 {
        pack_xz(self.x, self.z)
    }

    /// Origin of the tile group this key falls in, floored toward negative infinity.
    #[inline]
    pub fn group_origin(&self, group_size: i32) -> (i32, i32) {
        (
            grouped_coordinate(self.x, group_size),
            grouped_coordinate(self.z, group_size),
        )
    }

    #[inline]
    pub fn group_key(&self, group_size: i32) -> u64 {
        let (gx, gz) = self.group_origin(group_size);
        pack_xz(gx, gz)
    }
}

impl PartialEq for WorldKey {
    fn eq(&self, other: &Self) -> bool {
        let same_column = self.record_type == other.record_type
            && self.x == other.x
            && self.z == other.z
            && self.dimension == other.dimension;
        same_column
            && (self.sub_index == WILDCARD_SUB_INDEX
                || other.sub_index == WILDCARD_SUB_INDEX
                || self.sub_index == other.sub_index)
    }
}

impl Eq for WorldKey {}

impl Hash for WorldKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record_type.hash(state);
        self.x.hash(state);
        self.z.hash(state);
        self.dimension.hash(state);
    }
}

impl fmt::Display for WorldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} dim{} [{}] sub {}",
            self.x, self.z, self.dimension, self.record_type, self.sub_y()
        )
    }
}

#[inline]
pub fn grouped_coordinate(value: i32, group_size: i32) -> i32 {
    let g = group_size.max(1);
    value.div_euclid(g) * g
}

#[inline]
pub fn pack_xz(x: i32, z: i32) -> u64 {
    ((x as u32 as u64) << 32) | (z as u32 as u64)
}

#[inline]
pub fn unpack_xz(packed: u64) -> (i32, i32) {
    ((packed >> 32) as u32 as i32, packed as u32 as i32)
}

#[inline]
fn read_i32_le(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
