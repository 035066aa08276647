use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use strata_blocks::{TEXTURE_SIZE, TextureSource};
use strata_world::{CHUNK_WIDTH, ChunkData};

use crate::brightness::Brillouin;
use crate::canvas;
use crate::profile::{ColumnFilter, Profile};
use crate::settings::{RenderMode, RenderSettings};

/// Never painted, under any profile.
pub const LIGHT_BLOCK_ID: &str = "minecraft:light_block";

/// A block whose texture could not be resolved or loaded.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MissingTexture {
    pub id: String,
    pub file: Option<String>,
}

impl fmt::Display for MissingTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "ID: {}, {}", self.id, file),
            None => write!(f, "ID: {}", self.id),
        }
    }
}

/// Paints decoded chunks into tile images. Not shared between threads: each
/// render worker owns one, together with its elevation tints and diagnostics.
pub struct ChunkRenderer {
    textures: Arc<dyn TextureSource>,
    profile: Profile,
    mode: RenderMode,
    filter: ColumnFilter,
    curve: Brillouin,
    brightness_offset: i32,
    elevation: Vec<Option<RgbaImage>>,
    missing: BTreeSet<MissingTexture>,
    painted: u64,
}

impl ChunkRenderer {
    pub fn new(textures: Arc<dyn TextureSource>, settings: &RenderSettings) -> Self {
        Self {
            textures,
            profile: settings.profile,
            mode: settings.render_mode,
            filter: settings.column_filter(),
            curve: Brillouin::new(settings.brillouin_j, settings.brillouin_divider),
            brightness_offset: settings.brightness_offset(),
            elevation: vec![None; 256],
            missing: BTreeSet::new(),
            painted: 0,
        }
    }

    /// Draws `chunk` with its north-west corner at `(x_offset, z_offset)` of `dest`.
    pub fn render(&mut self, dest: &mut RgbaImage, chunk: &ChunkData, x_offset: i64, z_offset: i64) {
        let textures = Arc::clone(&self.textures);
        let step = TEXTURE_SIZE as i64;
        for (lx, lz, column) in chunk.columns() {
            if column.is_empty() {
                continue;
            }
            let prepared = self.filter.prepare(column);
            let selected = self.profile.select(&prepared, |id| textures.is_transparent(id));
            let px = x_offset + lx as i64 * step;
            let pz = z_offset + lz as i64 * step;

            for entry in selected.iter().rev() {
                let block = &entry.block;
                if block.id == LIGHT_BLOCK_ID {
                    continue;
                }
                if self.profile == Profile::Elevation {
                    let tint = self.elevation_tint(entry.y);
                    canvas::draw_with_brightness(dest, tint, px, pz, 1.0);
                    self.painted += 1;
                    continue;
                }
                let wx = chunk.x * CHUNK_WIDTH as i32 + lx as i32;
                let wz = chunk.z * CHUNK_WIDTH as i32 + lz as i32;
                let Some(refs) = textures.find_textures(&block.id, &block.data, wx, wz, entry.y)
                else {
                    log::debug!("missing texture: {}", block);
                    self.missing.insert(MissingTexture {
                        id: block.id.clone(),
                        file: None,
                    });
                    continue;
                };
                let brightness = match self.mode {
                    RenderMode::Heightmap => self.curve.brightness(entry.y - self.brightness_offset),
                    RenderMode::Normal => 1.0,
                };
                for r in &refs {
                    match textures.texture_image(r) {
                        Some(img) => {
                            canvas::draw_with_brightness(dest, &img, px, pz, brightness);
                            self.painted += 1;
                        }
                        None => {
                            log::debug!("missing texture file {} for {}", r.file, block);
                            self.missing.insert(MissingTexture {
                                id: block.id.clone(),
                                file: Some(r.file.clone()),
                            });
                        }
                    }
                }
            }
        }
    }

    /// 16x16 black tint with alpha equal to `y`, clamped to 0..=255.
    fn elevation_tint(&mut self, y: i32) -> &RgbaImage {
        let level = y.clamp(0, 255) as usize;
        self.elevation[level].get_or_insert_with(|| {
            RgbaImage::from_pixel(TEXTURE_SIZE, TEXTURE_SIZE, Rgba([0, 0, 0, level as u8]))
        })
    }

    pub fn missing(&self) -> &BTreeSet<MissingTexture> {
        &self.missing
    }

    pub fn take_missing(&mut self) -> BTreeSet<MissingTexture> {
        std::mem::take(&mut self.missing)
    }

    /// Texture draws performed so far.
    pub fn painted(&self) -> u64 {
        self.painted
    }
}
