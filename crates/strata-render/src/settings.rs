use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::profile::{ColumnFilter, Profile};

/// Tile image encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl TileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpg",
            TileFormat::Webp => "webp",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpeg",
            TileFormat::Webp => "webp",
        }
    }
}

impl FromStr for TileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(TileFormat::Png),
            "jpg" | "jpeg" => Ok(TileFormat::Jpeg),
            "webp" => Ok(TileFormat::Webp),
            other => Err(format!("unknown tile format '{}'", other)),
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Brightness follows block height.
    #[default]
    Heightmap,
    Normal,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heightmap" => Ok(RenderMode::Heightmap),
            "normal" | "flat" => Ok(RenderMode::Normal),
            other => Err(format!("unknown render mode '{}'", other)),
        }
    }
}

/// Immutable per-run render configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub profile: Profile,
    pub render_mode: RenderMode,
    pub y_min: Option<i32>,
    /// Upper y bound; ignored unless positive.
    pub y_max: i32,
    pub trim_ceiling: bool,
    pub brillouin_j: f32,
    pub brillouin_divider: f32,
    pub brillouin_offset: i32,
    pub format: TileFormat,
    pub quality: u8,
    pub chunks_per_dimension: u32,
    pub threads: usize,
    pub max_queue: usize,
    pub force_overwrite: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            profile: Profile::Default,
            render_mode: RenderMode::Heightmap,
            y_min: None,
            y_max: -1,
            trim_ceiling: false,
            brillouin_j: 10000.0,
            brillouin_divider: 20.0,
            brillouin_offset: 64,
            format: TileFormat::Png,
            quality: 95,
            chunks_per_dimension: 2,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_queue: 128,
            force_overwrite: false,
        }
    }
}

/// Largest tile edge in chunks. 16 chunks make 4096 px tiles of 64 MiB.
pub const MAX_CHUNKS_PER_DIMENSION: u32 = 16;

/// `chunks` forced into `1..=MAX_CHUNKS_PER_DIMENSION`.
pub fn clamp_chunks_per_dimension(chunks: u32) -> u32 {
    chunks.clamp(1, MAX_CHUNKS_PER_DIMENSION)
}

impl RenderSettings {
    /// Pixels per tile edge: 16 pixels per block, 16 blocks per chunk.
    pub fn tile_size(&self) -> u32 {
        clamp_chunks_per_dimension(self.chunks_per_dimension) * 16 * 16
    }

    pub fn column_filter(&self) -> ColumnFilter {
        ColumnFilter {
            y_min: self.y_min,
            y_max: self.y_max,
            trim_ceiling: self.trim_ceiling,
        }
    }

    /// Height subtracted before the brightness curve.
    pub fn brightness_offset(&self) -> i32 {
        let offset = self.brillouin_offset.min(self.y_max);
        if offset < 0 {
            self.brillouin_offset
        } else {
            offset
        }
    }
}
