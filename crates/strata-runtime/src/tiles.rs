use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::{ImageError, RgbaImage};
use strata_render::{Profile, TileFormat, canvas};

/// Zoom level of the tiles rendered straight from chunks.
pub const FINEST_ZOOM: i32 = 20;

pub const MAP_DIR: &str = "map";
pub const UPDATE_DIR: &str = "update";

#[derive(Debug)]
pub enum TileStoreError {
    Io(io::Error),
    Image(ImageError),
    /// A file in the update tree that is not a tile of the configured format.
    ForeignFile(PathBuf),
}

impl fmt::Display for TileStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileStoreError::Io(e) => write!(f, "tile i/o error: {}", e),
            TileStoreError::Image(e) => write!(f, "tile image error: {}", e),
            TileStoreError::ForeignFile(p) => write!(
                f,
                "refusing to clear update folder: {} is not a tile of this map",
                p.display()
            ),
        }
    }
}

impl std::error::Error for TileStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TileStoreError::Io(e) => Some(e),
            TileStoreError::Image(e) => Some(e),
            TileStoreError::ForeignFile(_) => None,
        }
    }
}

impl From<io::Error> for TileStoreError {
    fn from(e: io::Error) -> Self {
        TileStoreError::Io(e)
    }
}

impl From<ImageError> for TileStoreError {
    fn from(e: ImageError) -> Self {
        TileStoreError::Image(e)
    }
}

/// Tile files of one (dimension, profile) map under an output root.
///
/// Layout: `<root>/map/dim<N>[_<profile>]/<zoom>/<x>/<z>.<ext>`, and the same
/// below `<root>/update/` while an incremental run stages its tiles.
#[derive(Clone, Debug)]
pub struct TileStore {
    map_dir: PathBuf,
    update_dir: Option<PathBuf>,
    format: TileFormat,
    quality: u8,
}

impl TileStore {
    /// `incremental` routes writes to the update tree.
    pub fn new(
        output_root: impl AsRef<Path>,
        dimension: i32,
        profile: Profile,
        format: TileFormat,
        quality: u8,
        incremental: bool,
    ) -> Self {
        let root = output_root.as_ref();
        let leaf = format!("dim{}{}", dimension, profile.dir_suffix());
        Self {
            map_dir: root.join(MAP_DIR).join(&leaf),
            update_dir: incremental.then(|| root.join(UPDATE_DIR).join(&leaf)),
            format,
            quality,
        }
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn map_dir(&self) -> &Path {
        &self.map_dir
    }

    pub fn update_dir(&self) -> Option<&Path> {
        self.update_dir.as_deref()
    }

    /// Directory new tiles are written to.
    pub fn write_dir(&self) -> &Path {
        self.update_dir.as_deref().unwrap_or(&self.map_dir)
    }

    fn rel(&self, zoom: i32, x: i32, z: i32) -> PathBuf {
        PathBuf::from(zoom.to_string())
            .join(x.to_string())
            .join(format!("{}.{}", z, self.format.extension()))
    }

    pub fn map_path(&self, zoom: i32, x: i32, z: i32) -> PathBuf {
        self.map_dir.join(self.rel(zoom, x, z))
    }

    pub fn write_path(&self, zoom: i32, x: i32, z: i32) -> PathBuf {
        self.write_dir().join(self.rel(zoom, x, z))
    }

    pub fn save(&self, img: &RgbaImage, zoom: i32, x: i32, z: i32) -> Result<PathBuf, TileStoreError> {
        let path = self.write_path(zoom, x, z);
        canvas::save(img, &path, self.format, self.quality)?;
        Ok(path)
    }

    fn load_at(path: &Path) -> Option<RgbaImage> {
        if !path.is_file() {
            return None;
        }
        match canvas::load(path) {
            Ok(img) => Some(img),
            Err(e) => {
                log::warn!("unreadable tile {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Tile from the update tree only.
    pub fn load_update(&self, zoom: i32, x: i32, z: i32) -> Option<RgbaImage> {
        let dir = self.update_dir.as_ref()?;
        Self::load_at(&dir.join(self.rel(zoom, x, z)))
    }

    /// Tile from the update tree, else from the map tree.
    pub fn load_update_first(&self, zoom: i32, x: i32, z: i32) -> Option<RgbaImage> {
        self.load_update(zoom, x, z)
            .or_else(|| Self::load_at(&self.map_path(zoom, x, z)))
    }

    /// Removes every staged tile. Fails, touching nothing, when the update
    /// tree holds any file that is not a tile of this store's format.
    pub fn clear_update_tree(&self) -> Result<usize, TileStoreError> {
        let Some(dir) = &self.update_dir else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }
        let files = walk_files(dir)?;
        let ext = self.format.extension();
        if let Some(foreign) = files
            .iter()
            .find(|p| p.extension().and_then(|e| e.to_str()) != Some(ext))
        {
            return Err(TileStoreError::ForeignFile(foreign.clone()));
        }
        fs::remove_dir_all(dir)?;
        log::info!("cleared {} staged tiles from {}", files.len(), dir.display());
        Ok(files.len())
    }

    /// Copies every staged tile of this format into the map tree, overwriting,
    /// then removes the update tree.
    pub fn promote_update_tree(&self) -> Result<usize, TileStoreError> {
        let Some(dir) = &self.update_dir else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }
        let ext = self.format.extension();
        let mut copied = 0;
        for src in walk_files(dir)? {
            if src.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Ok(rel) = src.strip_prefix(dir) else {
                continue;
            };
            let dest = self.map_dir.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dest)?;
            copied += 1;
        }
        fs::remove_dir_all(dir)?;
        log::info!("promoted {} tiles into {}", copied, self.map_dir.display());
        Ok(copied)
    }
}

fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}
