//! Subchunk record decoding into chunk columns.
#![forbid(unsafe_code)]

pub mod nbt;
pub mod subchunk;

use std::fmt;
use std::io;

use strata_world::ChunkData;

pub use subchunk::{
    PaletteLayer, SUBCHUNK_VOLUME, Subchunk, encode_subchunk, local_index, local_position,
    parse_subchunk,
};

#[derive(Debug)]
pub enum DecodeError {
    Io(io::Error),
    UnsupportedVersion(u8),
    RuntimePalette,
    InvalidBitsPerBlock(u8),
    InvalidPaletteSize(i32),
    IndexOutOfPalette { index: u16, len: usize },
    MalformedPaletteEntry,
    NoLayers,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io(e) => write!(f, "truncated or unreadable subchunk: {}", e),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported subchunk version {}", v),
            DecodeError::RuntimePalette => f.write_str("runtime-id palettes are not supported"),
            DecodeError::InvalidBitsPerBlock(b) => write!(f, "invalid bits per block {}", b),
            DecodeError::InvalidPaletteSize(n) => write!(f, "invalid palette size {}", n),
            DecodeError::IndexOutOfPalette { index, len } => {
                write!(f, "palette index {} out of range (palette has {})", index, len)
            }
            DecodeError::MalformedPaletteEntry => {
                f.write_str("palette entry is not a compound with a name")
            }
            DecodeError::NoLayers => f.write_str("subchunk has no storage layers"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        DecodeError::Io(e)
    }
}

/// Turns raw subchunk records into block columns.
pub trait SubchunkDecoder: Send + Sync {
    /// Appends the non-air blocks of one record at vertical index `sub_y`.
    fn decode_into(&self, chunk: &mut ChunkData, sub_y: i8, bytes: &[u8])
    -> Result<(), DecodeError>;

    /// Decodes every record of one chunk column.
    fn decode_chunk(
        &self,
        x: i32,
        z: i32,
        subchunks: &[(i8, &[u8])],
    ) -> Result<ChunkData, DecodeError> {
        let mut chunk = ChunkData::new(x, z);
        for (sub_y, bytes) in subchunks {
            self.decode_into(&mut chunk, *sub_y, bytes)?;
        }
        Ok(chunk)
    }
}

/// Decoder for persistent-palette records. Only the first storage layer is read;
/// the second holds waterlogging and is not painted.
#[derive(Clone, Copy, Debug, Default)]
pub struct PaletteDecoder;

impl SubchunkDecoder for PaletteDecoder {
    fn decode_into(
        &self,
        chunk: &mut ChunkData,
        sub_y: i8,
        bytes: &[u8],
    ) -> Result<(), DecodeError> {
        let sub = parse_subchunk(bytes)?;
        let layer = sub.layers.first().ok_or(DecodeError::NoLayers)?;
        if let Some(y) = sub.y_index {
            if y != sub_y {
                log::trace!(
                    "chunk {},{}: record y index {} differs from key {}",
                    chunk.x,
                    chunk.z,
                    y,
                    sub_y
                );
            }
        }
        let base_y = sub_y as i32 * 16;
        for (idx, &pi) in layer.indices.iter().enumerate() {
            let block = &layer.palette[pi as usize];
            if block.is_air() {
                continue;
            }
            let (lx, ly, lz) = local_position(idx);
            chunk.push(lx, base_y + ly as i32, lz, block.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_world::BlockRecord;

    #[test]
    fn decodes_columns_with_world_y() {
        let mut layer = PaletteLayer::uniform(BlockRecord::air());
        layer.set(3, 0, 4, &BlockRecord::new("minecraft:stone"));
        layer.set(3, 15, 4, &BlockRecord::new("minecraft:grass_block"));
        let low = encode_subchunk(-1, &[layer.clone()]);
        let high = encode_subchunk(2, &[layer]);

        let chunk = PaletteDecoder
            .decode_chunk(5, -7, &[(-1, &low[..]), (2, &high[..])])
            .unwrap();
        assert_eq!((chunk.x, chunk.z), (5, -7));
        assert_eq!(chunk.block_count(), 4);
        let ys: Vec<i32> = chunk
            .column(3, 4)
            .sky_to_bedrock()
            .iter()
            .map(|e| e.y)
            .collect();
        assert_eq!(ys, vec![47, 32, -1, -16]);
        assert!(chunk.column(0, 0).is_empty());
    }

    #[test]
    fn decode_error_propagates() {
        let err = PaletteDecoder.decode_chunk(0, 0, &[(0, &[3u8][..])]).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion(3)));
        assert!(err.to_string().contains("version 3"));
    }

    #[test]
    fn zero_layers_is_an_error() {
        let err = PaletteDecoder.decode_chunk(0, 0, &[(0, &[8u8, 0][..])]).unwrap_err();
        assert!(matches!(err, DecodeError::NoLayers));
    }
}
