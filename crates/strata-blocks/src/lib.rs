//! Texture catalog and atlas: block id to 16x16 texture images.
#![forbid(unsafe_code)]

pub mod catalog;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use hashbrown::HashMap;
use image::RgbaImage;
use image::imageops::{self, FilterType};
use strata_world::BlockValue;

pub use catalog::{ResolvedTextures, TextureCatalog, TextureRef};

/// Edge length of one block texture in pixels.
pub const TEXTURE_SIZE: u32 = 16;

/// File name of the catalog inside a texture root.
pub const CATALOG_FILE: &str = "catalog.toml";

/// Resolves blocks to drawable textures.
pub trait TextureSource: Send + Sync {
    fn find_textures(
        &self,
        id: &str,
        data: &BTreeMap<String, BlockValue>,
        x: i32,
        z: i32,
        y: i32,
    ) -> Option<Vec<TextureRef>>;

    fn texture_image(&self, texture: &TextureRef) -> Option<Arc<RgbaImage>>;

    fn is_transparent(&self, id: &str) -> bool;
}

/// Catalog plus a lazily filled image cache. Failed loads are cached as `None`
/// so a missing file is only read (and reported) once.
pub struct TextureAtlas {
    root: PathBuf,
    catalog: TextureCatalog,
    images: RwLock<HashMap<TextureRef, Option<Arc<RgbaImage>>>>,
}

impl TextureAtlas {
    pub fn new(root: impl Into<PathBuf>, catalog: TextureCatalog) -> Self {
        Self {
            root: root.into(),
            catalog,
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Opens `<root>/catalog.toml`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let root = root.as_ref();
        let catalog = TextureCatalog::from_path(root.join(CATALOG_FILE))
            .map_err(|e| format!("texture catalog {}: {}", root.join(CATALOG_FILE).display(), e))?;
        log::info!(
            "loaded texture catalog from {} ({} blocks)",
            root.display(),
            catalog.blocks.len()
        );
        Ok(Self::new(root, catalog))
    }

    pub fn catalog(&self) -> &TextureCatalog {
        &self.catalog
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Seeds the cache with an in-memory image for `file` (unrotated).
    pub fn insert_image(&self, file: impl Into<String>, img: RgbaImage) {
        let key = TextureRef::new(file);
        if let Ok(mut map) = self.images.write() {
            map.insert(key, Some(Arc::new(normalize(img))));
        }
    }

    pub fn cached_len(&self) -> usize {
        self.images.read().map(|m| m.len()).unwrap_or(0)
    }

    fn load(&self, texture: &TextureRef) -> Option<Arc<RgbaImage>> {
        let base = if texture.rotation != 0 {
            // rotated variants derive from the cached unrotated image
            self.texture_image(&TextureRef::new(texture.file.clone()))?
                .as_ref()
                .clone()
        } else {
            let path = self.root.join(&texture.file);
            match image::open(&path) {
                Ok(img) => normalize(img.to_rgba8()),
                Err(e) => {
                    log::warn!("texture {} failed to load: {}", path.display(), e);
                    return None;
                }
            }
        };
        let rotated = match texture.rotation {
            90 => imageops::rotate90(&base),
            180 => imageops::rotate180(&base),
            270 => imageops::rotate270(&base),
            _ => base,
        };
        Some(Arc::new(rotated))
    }
}

fn normalize(img: RgbaImage) -> RgbaImage {
    if img.dimensions() == (TEXTURE_SIZE, TEXTURE_SIZE) {
        img
    } else {
        imageops::resize(&img, TEXTURE_SIZE, TEXTURE_SIZE, FilterType::Nearest)
    }
}

impl TextureSource for TextureAtlas {
    fn find_textures(
        &self,
        id: &str,
        data: &BTreeMap<String, BlockValue>,
        x: i32,
        z: i32,
        y: i32,
    ) -> Option<Vec<TextureRef>> {
        self.catalog.get(id)?.resolve(data, x, z, y)
    }

    fn texture_image(&self, texture: &TextureRef) -> Option<Arc<RgbaImage>> {
        if let Ok(map) = self.images.read() {
            if let Some(hit) = map.get(texture) {
                return hit.clone();
            }
        }
        let loaded = self.load(texture);
        if let Ok(mut map) = self.images.write() {
            map.entry(texture.clone()).or_insert_with(|| loaded.clone());
        }
        loaded
    }

    fn is_transparent(&self, id: &str) -> bool {
        self.catalog.is_transparent(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_catalog(dir: &Path) {
        std::fs::write(
            dir.join(CATALOG_FILE),
            r#"
transparent = ["minecraft:water"]
[blocks]
"minecraft:stone" = "stone.png"
"minecraft:water" = "water.png"
"minecraft:tilted" = { files = ["arrow.png"], rotation = 90 }
"#,
        )
        .unwrap();
    }

    #[test]
    fn loads_resizes_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path());
        RgbaImage::from_pixel(32, 32, Rgba([10, 20, 30, 255]))
            .save(dir.path().join("stone.png"))
            .unwrap();

        let atlas = TextureAtlas::open(dir.path()).unwrap();
        let refs = atlas
            .find_textures("minecraft:stone", &BTreeMap::new(), 0, 0, 0)
            .unwrap();
        let img = atlas.texture_image(&refs[0]).unwrap();
        assert_eq!(img.dimensions(), (16, 16));
        assert_eq!(img.get_pixel(3, 3), &Rgba([10, 20, 30, 255]));
        assert_eq!(atlas.cached_len(), 1);
        assert!(atlas.is_transparent("minecraft:water"));
    }

    #[test]
    fn missing_file_is_none_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path());
        let atlas = TextureAtlas::open(dir.path()).unwrap();
        let water = TextureRef::new("water.png");
        assert!(atlas.texture_image(&water).is_none());
        assert!(atlas.texture_image(&water).is_none());
        assert_eq!(atlas.cached_len(), 1);
    }

    #[test]
    fn rotation_applies_quarter_turns() {
        let atlas = TextureAtlas::new("/nonexistent", TextureCatalog::new());
        let mut img = RgbaImage::new(16, 16);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        atlas.insert_image("arrow.png", img);
        let turned = atlas
            .texture_image(&TextureRef {
                file: "arrow.png".into(),
                rotation: 90,
            })
            .unwrap();
        // top-left moves to top-right under a clockwise quarter turn
        assert_eq!(turned.get_pixel(15, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(turned.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn missing_catalog_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TextureAtlas::open(dir.path()).is_err());
    }
}
