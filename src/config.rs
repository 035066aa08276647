use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strata_render::{MAX_CHUNKS_PER_DIMENSION, Profile, RenderMode, RenderSettings, TileFormat};
use strata_world::ChunkBounds;

pub const CONFIG_FILE: &str = "strata.toml";

/// Optional run configuration. Every field has a default, so an empty file
/// is valid; command-line flags are applied on top.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub render: RenderSection,
    pub output: OutputSection,
    pub limits: LimitsSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub profile: Profile,
    pub render_mode: RenderMode,
    pub format: TileFormat,
    pub quality: u8,
    pub chunks_per_dimension: u32,
    pub y_min: Option<i32>,
    pub y_max: i32,
    pub trim_ceiling: bool,
    pub brillouin_j: f32,
    pub brillouin_divider: f32,
    pub brillouin_offset: i32,
    pub force_overwrite: bool,
}

impl Default for RenderSection {
    fn default() -> Self {
        let s = RenderSettings::default();
        Self {
            profile: s.profile,
            render_mode: s.render_mode,
            format: s.format,
            quality: s.quality,
            chunks_per_dimension: s.chunks_per_dimension,
            y_min: s.y_min,
            y_max: s.y_max,
            trim_ceiling: s.trim_ceiling,
            brillouin_j: s.brillouin_j,
            brillouin_divider: s.brillouin_divider,
            brillouin_offset: s.brillouin_offset,
            force_overwrite: s.force_overwrite,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub root: Option<PathBuf>,
    pub dimension: i32,
    pub delete_existing_update_folder: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Inclusive chunk x range.
    pub x: Option<[i32; 2]>,
    /// Inclusive chunk z range.
    pub z: Option<[i32; 2]>,
    pub threads: Option<usize>,
    pub max_queue: Option<usize>,
}

impl RunConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: Self = toml::from_str(toml_str)?;
        let chunks = cfg.render.chunks_per_dimension;
        if !(1..=MAX_CHUNKS_PER_DIMENSION).contains(&chunks) {
            return Err(format!(
                "render.chunks_per_dimension must be 1..={}, got {}",
                MAX_CHUNKS_PER_DIMENSION, chunks
            )
            .into());
        }
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// `explicit` must exist; otherwise `strata.toml` in the working
    /// directory is read when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        match explicit {
            Some(path) => Self::from_path(path)
                .map_err(|e| format!("config {}: {}", path.display(), e).into()),
            None => {
                let local = PathBuf::from(CONFIG_FILE);
                if local.is_file() {
                    log::info!("using {}", local.display());
                    Self::from_path(&local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let r = &self.render;
        let mut settings = RenderSettings {
            profile: r.profile,
            render_mode: r.render_mode,
            y_min: r.y_min,
            y_max: r.y_max,
            trim_ceiling: r.trim_ceiling,
            brillouin_j: r.brillouin_j,
            brillouin_divider: r.brillouin_divider,
            brillouin_offset: r.brillouin_offset,
            format: r.format,
            quality: r.quality,
            chunks_per_dimension: r.chunks_per_dimension,
            force_overwrite: r.force_overwrite,
            ..RenderSettings::default()
        };
        if let Some(threads) = self.limits.threads {
            settings.threads = threads.max(1);
        }
        if let Some(max_queue) = self.limits.max_queue {
            settings.max_queue = max_queue.max(1);
        }
        settings
    }

    /// Chunk rectangle from the x and z limits; an unset axis is unbounded.
    pub fn chunk_bounds(&self) -> Option<ChunkBounds> {
        limit_bounds(self.limits.x, self.limits.z)
    }
}

pub fn limit_bounds(x: Option<[i32; 2]>, z: Option<[i32; 2]>) -> Option<ChunkBounds> {
    if x.is_none() && z.is_none() {
        return None;
    }
    let [min_x, max_x] = x.unwrap_or([i32::MIN, i32::MAX]);
    let [min_z, max_z] = z.unwrap_or([i32::MIN, i32::MAX]);
    Some(ChunkBounds::new(min_x, max_x, min_z, max_z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = RunConfig::from_toml_str("").unwrap();
        let s = cfg.render_settings();
        assert_eq!(s, RenderSettings::default());
        assert!(cfg.chunk_bounds().is_none());
        assert_eq!(cfg.output.dimension, 0);
    }

    #[test]
    fn sections_are_applied() {
        let cfg = RunConfig::from_toml_str(
            r#"
            [render]
            profile = "underground"
            render_mode = "normal"
            format = "jpg"
            quality = 80
            y_max = 40

            [output]
            dimension = 1
            delete_existing_update_folder = true

            [limits]
            x = [-10, 10]
            threads = 3
            "#,
        )
        .unwrap();
        let s = cfg.render_settings();
        assert_eq!(s.profile, Profile::Underground);
        assert_eq!(s.render_mode, RenderMode::Normal);
        assert_eq!(s.format, TileFormat::Jpeg);
        assert_eq!((s.quality, s.y_max, s.threads), (80, 40, 3));
        assert!(cfg.output.delete_existing_update_folder);
        let b = cfg.chunk_bounds().unwrap();
        assert!(b.contains(-10, 123_456));
        assert!(!b.contains(11, 0));
    }

    #[test]
    fn unknown_profile_falls_back() {
        let cfg = RunConfig::from_toml_str("[render]\nprofile = \"volcanic\"\n").unwrap();
        assert_eq!(cfg.render.profile, Profile::Default);
    }

    #[test]
    fn bad_types_are_rejected() {
        assert!(RunConfig::from_toml_str("[render]\nquality = \"high\"\n").is_err());
    }

    #[test]
    fn oversized_tiles_are_rejected() {
        let err = RunConfig::from_toml_str("[render]\nchunks_per_dimension = 4096\n").unwrap_err();
        assert!(err.to_string().contains("chunks_per_dimension"));
        assert!(RunConfig::from_toml_str("[render]\nchunks_per_dimension = 0\n").is_err());
        assert!(RunConfig::from_toml_str("[render]\nchunks_per_dimension = 16\n").is_ok());
    }
}
