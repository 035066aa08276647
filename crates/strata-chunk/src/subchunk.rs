use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use strata_world::{BlockRecord, BlockValue};

use crate::DecodeError;
use crate::nbt::Tag;

/// Blocks in one 16x16x16 subchunk.
pub const SUBCHUNK_VOLUME: usize = 4096;

const VALID_BITS: [u8; 9] = [0, 1, 2, 3, 4, 5, 6, 8, 16];

/// Packed index of a local position; x outermost, y innermost.
#[inline]
pub fn local_index(lx: usize, ly: usize, lz: usize) -> usize {
    (lx << 8) | (lz << 4) | ly
}

/// Inverse of [`local_index`]: `(lx, ly, lz)`.
#[inline]
pub fn local_position(idx: usize) -> (usize, usize, usize) {
    (idx >> 8, idx & 0x0F, (idx >> 4) & 0x0F)
}

/// One storage layer: a palette and a palette index per block.
#[derive(Clone, Debug)]
pub struct PaletteLayer {
    pub palette: Vec<Arc<BlockRecord>>,
    pub indices: Vec<u16>,
}

impl PaletteLayer {
    /// A layer filled with a single block.
    pub fn uniform(block: BlockRecord) -> Self {
        Self {
            palette: vec![Arc::new(block)],
            indices: vec![0; SUBCHUNK_VOLUME],
        }
    }

    /// Returns the palette index of `block`, appending it when new.
    pub fn palette_index(&mut self, block: &BlockRecord) -> u16 {
        if let Some(i) = self.palette.iter().position(|b| **b == *block) {
            return i as u16;
        }
        self.palette.push(Arc::new(block.clone()));
        (self.palette.len() - 1) as u16
    }

    pub fn set(&mut self, lx: usize, ly: usize, lz: usize, block: &BlockRecord) {
        let i = self.palette_index(block);
        self.indices[local_index(lx, ly, lz)] = i;
    }

    #[inline]
    pub fn get(&self, lx: usize, ly: usize, lz: usize) -> Option<&Arc<BlockRecord>> {
        self.palette.get(self.indices[local_index(lx, ly, lz)] as usize)
    }

    fn bits_per_block(&self) -> u8 {
        match self.palette.len() {
            0..=1 => 0,
            2 => 1,
            3..=4 => 2,
            5..=8 => 3,
            9..=16 => 4,
            17..=32 => 5,
            33..=64 => 6,
            65..=256 => 8,
            _ => 16,
        }
    }
}

/// A decoded subchunk record.
#[derive(Clone, Debug)]
pub struct Subchunk {
    pub version: u8,
    /// Vertical index carried by version 9 records.
    pub y_index: Option<i8>,
    pub layers: Vec<PaletteLayer>,
}

/// Parses a persistent-palette subchunk record (versions 1, 8 and 9).
pub fn parse_subchunk(data: &[u8]) -> Result<Subchunk, DecodeError> {
    let mut cur = Cursor::new(data);
    let version = cur.read_u8()?;
    let (layer_count, y_index) = match version {
        1 => (1, None),
        8 => (cur.read_u8()?, None),
        9 => {
            let count = cur.read_u8()?;
            (count, Some(cur.read_i8()?))
        }
        v => return Err(DecodeError::UnsupportedVersion(v)),
    };
    let mut layers = Vec::with_capacity(layer_count as usize);
    for _ in 0..layer_count {
        layers.push(parse_layer(&mut cur)?);
    }
    Ok(Subchunk {
        version,
        y_index,
        layers,
    })
}

fn parse_layer(cur: &mut Cursor<&[u8]>) -> Result<PaletteLayer, DecodeError> {
    let header = cur.read_u8()?;
    let bits = header >> 1;
    if header & 1 == 1 {
        return Err(DecodeError::RuntimePalette);
    }
    if !VALID_BITS.contains(&bits) {
        return Err(DecodeError::InvalidBitsPerBlock(bits));
    }

    let mut indices = vec![0u16; SUBCHUNK_VOLUME];
    if bits > 0 {
        let per_word = 32 / bits as usize;
        let words = SUBCHUNK_VOLUME.div_ceil(per_word);
        let mask = (1u32 << bits) - 1;
        for w in 0..words {
            let word = cur.read_u32::<LittleEndian>()?;
            for slot in 0..per_word {
                let idx = w * per_word + slot;
                if idx >= SUBCHUNK_VOLUME {
                    break;
                }
                indices[idx] = ((word >> (bits as u32 * slot as u32)) & mask) as u16;
            }
        }
    }

    let count = cur.read_i32::<LittleEndian>()?;
    let count = usize::try_from(count).map_err(|_| DecodeError::InvalidPaletteSize(count))?;
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    // every palette compound takes at least a few bytes
    if count > remaining {
        return Err(DecodeError::InvalidPaletteSize(count as i32));
    }
    let mut palette = Vec::with_capacity(count);
    for _ in 0..count {
        palette.push(Arc::new(read_palette_entry(cur)?));
    }
    if palette.is_empty() {
        return Err(DecodeError::InvalidPaletteSize(0));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= palette.len()) {
        return Err(DecodeError::IndexOutOfPalette {
            index: bad,
            len: palette.len(),
        });
    }
    Ok(PaletteLayer { palette, indices })
}

fn read_palette_entry<R: Read>(reader: &mut R) -> Result<BlockRecord, DecodeError> {
    let (_, tag) = Tag::read(reader)?;
    let map = tag.as_compound().ok_or(DecodeError::MalformedPaletteEntry)?;
    let id = map
        .get("name")
        .and_then(Tag::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MalformedPaletteEntry)?;
    let mut record = BlockRecord::new(id);
    record.version = map.get("version").and_then(Tag::as_i32).unwrap_or(0);
    if let Some(states) = map.get("states").and_then(Tag::as_compound) {
        for (k, v) in states {
            if let Some(value) = tag_to_value(v) {
                record.data.insert(k.clone(), value);
            }
        }
    }
    Ok(record)
}

fn tag_to_value(tag: &Tag) -> Option<BlockValue> {
    Some(match tag {
        Tag::Byte(v) => BlockValue::Byte(*v),
        Tag::Short(v) => BlockValue::Short(*v),
        Tag::Int(v) => BlockValue::Int(*v),
        Tag::Long(v) => BlockValue::Long(*v),
        Tag::Float(v) => BlockValue::Float(*v),
        Tag::Double(v) => BlockValue::Double(*v),
        Tag::String(s) => BlockValue::Str(s.clone()),
        _ => return None,
    })
}

fn value_to_tag(value: &BlockValue) -> Tag {
    match value {
        BlockValue::Byte(v) => Tag::Byte(*v),
        BlockValue::Short(v) => Tag::Short(*v),
        BlockValue::Int(v) => Tag::Int(*v),
        BlockValue::Long(v) => Tag::Long(*v),
        BlockValue::Float(v) => Tag::Float(*v),
        BlockValue::Double(v) => Tag::Double(*v),
        BlockValue::Str(s) => Tag::String(s.clone()),
    }
}

fn palette_entry_tag(block: &BlockRecord) -> Tag {
    let states: HashMap<String, Tag> = block
        .data
        .iter()
        .map(|(k, v)| (k.clone(), value_to_tag(v)))
        .collect();
    let mut map = HashMap::new();
    map.insert("name".to_string(), Tag::String(block.id.clone()));
    map.insert("states".to_string(), Tag::Compound(states));
    map.insert("version".to_string(), Tag::Int(block.version));
    Tag::Compound(map)
}

/// Encodes a version 9 record with persistent palettes.
pub fn encode_subchunk(y_index: i8, layers: &[PaletteLayer]) -> Vec<u8> {
    let mut buf = vec![9u8, layers.len() as u8, y_index as u8];
    for layer in layers {
        encode_layer(&mut buf, layer);
    }
    buf
}

fn encode_layer(buf: &mut Vec<u8>, layer: &PaletteLayer) {
    let bits = layer.bits_per_block();
    buf.push(bits << 1);
    if bits > 0 {
        let per_word = 32 / bits as usize;
        let words = SUBCHUNK_VOLUME.div_ceil(per_word);
        for w in 0..words {
            let mut word = 0u32;
            for slot in 0..per_word {
                let idx = w * per_word + slot;
                if idx >= SUBCHUNK_VOLUME {
                    break;
                }
                word |= (layer.indices[idx] as u32) << (bits as u32 * slot as u32);
            }
            // writes into a Vec cannot fail
            let _ = buf.write_u32::<LittleEndian>(word);
        }
    }
    let _ = buf.write_i32::<LittleEndian>(layer.palette.len() as i32);
    for block in &layer.palette {
        let _ = palette_entry_tag(block).write(buf, "");
    }
}
