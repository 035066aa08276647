//! Column selection profiles, brightness and chunk-to-tile rasterization.
#![forbid(unsafe_code)]

pub mod brightness;
pub mod canvas;
pub mod profile;
pub mod renderer;
pub mod settings;

pub use brightness::Brillouin;
pub use profile::{CEILING_GAP, ColumnFilter, Profile};
pub use renderer::{ChunkRenderer, LIGHT_BLOCK_ID, MissingTexture};
pub use settings::{
    MAX_CHUNKS_PER_DIMENSION, RenderMode, RenderSettings, TileFormat, clamp_chunks_per_dimension,
};
