use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use strata_world::BlockValue;

/// One texture file plus the quarter turns applied when it is loaded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureRef {
    pub file: String,
    pub rotation: u16,
}

impl TextureRef {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            rotation: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ResolvedTextures {
    /// Drawn in order, bottom layer first.
    Layers(Vec<TextureRef>),
    /// Picked by the string form of one block-state property.
    By {
        by: String,
        map: HashMap<String, Vec<TextureRef>>,
        fallback: Vec<TextureRef>,
    },
    /// One of several looks, chosen by block position.
    Variants(Vec<TextureRef>),
}

impl ResolvedTextures {
    pub fn resolve(
        &self,
        data: &BTreeMap<String, BlockValue>,
        x: i32,
        z: i32,
        y: i32,
    ) -> Option<Vec<TextureRef>> {
        let out = match self {
            ResolvedTextures::Layers(v) => v.clone(),
            ResolvedTextures::By { by, map, fallback } => data
                .get(by)
                .and_then(|v| map.get(&v.to_string()))
                .unwrap_or(fallback)
                .clone(),
            ResolvedTextures::Variants(v) => {
                if v.is_empty() {
                    return None;
                }
                vec![v[position_hash(x, z, y) as usize % v.len()].clone()]
            }
        };
        (!out.is_empty()).then_some(out)
    }
}

#[inline]
fn position_hash(x: i32, z: i32, y: i32) -> u32 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B1);
    h ^= (z as u32).wrapping_mul(0x85EB_CA77);
    h ^= (y as u32).wrapping_mul(0xC2B2_AE3D);
    h ^= h >> 15;
    h.wrapping_mul(0x2C1B_3C6D)
}

/// Block id to texture mapping loaded from `catalog.toml`.
#[derive(Default, Clone, Debug)]
pub struct TextureCatalog {
    pub blocks: HashMap<String, ResolvedTextures>,
    pub transparent: HashSet<String>,
}

impl TextureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks `id` up as given, then without its namespace.
    pub fn get(&self, id: &str) -> Option<&ResolvedTextures> {
        self.blocks.get(id).or_else(|| {
            let (_, bare) = id.split_once(':')?;
            self.blocks.get(bare)
        })
    }

    pub fn is_transparent(&self, id: &str) -> bool {
        if self.transparent.contains(id) {
            return true;
        }
        match id.split_once(':') {
            Some((_, bare)) => self.transparent.contains(bare),
            None => false,
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, textures: ResolvedTextures) {
        self.blocks.insert(id.into(), textures);
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: CatalogConfig = toml::from_str(toml_str)?;
        let mut catalog = TextureCatalog::new();
        for (id, entry) in cfg.blocks {
            catalog.blocks.insert(id, compile_entry(entry));
        }
        catalog.transparent = cfg.transparent.into_iter().collect();
        log::debug!(
            "texture catalog: {} blocks, {} transparent",
            catalog.blocks.len(),
            catalog.transparent.len()
        );
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}

fn refs(files: Vec<String>, rotation: u16) -> Vec<TextureRef> {
    files
        .into_iter()
        .map(|file| TextureRef {
            file,
            rotation: rotation % 360,
        })
        .collect()
}

fn compile_entry(entry: TextureEntry) -> ResolvedTextures {
    match entry {
        TextureEntry::File(f) => ResolvedTextures::Layers(refs(vec![f], 0)),
        TextureEntry::Layers(v) => ResolvedTextures::Layers(refs(v, 0)),
        TextureEntry::Detail(d) => {
            if let Some(by) = d.by {
                let map = d
                    .map
                    .into_iter()
                    .map(|(k, v)| (k, refs(v.into_vec(), d.rotation)))
                    .collect();
                ResolvedTextures::By {
                    by,
                    map,
                    fallback: refs(d.files, d.rotation),
                }
            } else if !d.variants.is_empty() {
                ResolvedTextures::Variants(refs(d.variants, d.rotation))
            } else {
                ResolvedTextures::Layers(refs(d.files, d.rotation))
            }
        }
    }
}

// --- Config ---

#[derive(Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub transparent: Vec<String>,
    #[serde(default)]
    pub blocks: HashMap<String, TextureEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum TextureEntry {
    // "minecraft:stone" = "stone.png"
    File(String),
    // "minecraft:grass_block" = ["dirt.png", "grass_overlay.png"]
    Layers(Vec<String>),
    // "minecraft:oak_log" = { by = "pillar_axis", map = { y = "log_top.png" }, files = ["log_side.png"] }
    Detail(TextureDetail),
}

#[derive(Deserialize)]
pub struct TextureDetail {
    #[serde(default)]
    pub files: Vec<String>,
    pub by: Option<String>,
    #[serde(default)]
    pub map: HashMap<String, FileList>,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub rotation: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum FileList {
    One(String),
    Many(Vec<String>),
}

impl FileList {
    fn into_vec(self) -> Vec<String> {
        match self {
            FileList::One(s) => vec![s],
            FileList::Many(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
transparent = ["minecraft:glass", "tallgrass"]

[blocks]
"minecraft:stone" = "stone.png"
"minecraft:grass_block" = ["dirt.png", "grass_top.png"]
"minecraft:oak_log" = { by = "pillar_axis", map = { y = "log_top.png", x = ["log_side.png"] }, files = ["log_side.png"], rotation = 90 }
"flower" = { variants = ["poppy.png", "dandelion.png"] }
"#;

    fn no_state() -> BTreeMap<String, BlockValue> {
        BTreeMap::new()
    }

    #[test]
    fn parses_all_entry_shapes() {
        let cat = TextureCatalog::from_toml_str(CATALOG).unwrap();
        let stone = cat.get("minecraft:stone").unwrap().resolve(&no_state(), 0, 0, 0);
        assert_eq!(stone, Some(vec![TextureRef::new("stone.png")]));
        let grass = cat
            .get("minecraft:grass_block")
            .unwrap()
            .resolve(&no_state(), 0, 0, 0)
            .unwrap();
        assert_eq!(grass.len(), 2);
        assert_eq!(grass[1].file, "grass_top.png");
    }

    #[test]
    fn selector_uses_state_then_fallback() {
        let cat = TextureCatalog::from_toml_str(CATALOG).unwrap();
        let log = cat.get("minecraft:oak_log").unwrap();
        let mut data = BTreeMap::new();
        data.insert("pillar_axis".to_string(), BlockValue::Str("y".into()));
        let top = log.resolve(&data, 0, 0, 0).unwrap();
        assert_eq!(top[0].file, "log_top.png");
        assert_eq!(top[0].rotation, 90);
        let side = log.resolve(&no_state(), 0, 0, 0).unwrap();
        assert_eq!(side[0].file, "log_side.png");
    }

    #[test]
    fn variants_are_stable_per_position() {
        let cat = TextureCatalog::from_toml_str(CATALOG).unwrap();
        let flower = cat.get("minecraft:flower").unwrap();
        let a = flower.resolve(&no_state(), 3, 9, 64);
        assert_eq!(a, flower.resolve(&no_state(), 3, 9, 64));
        let seen: HashSet<String> = (0..64)
            .filter_map(|i| flower.resolve(&no_state(), i, -i, 70))
            .map(|v| v[0].file.clone())
            .collect();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn transparency_matches_with_or_without_namespace() {
        let cat = TextureCatalog::from_toml_str(CATALOG).unwrap();
        assert!(cat.is_transparent("minecraft:glass"));
        assert!(cat.is_transparent("minecraft:tallgrass"));
        assert!(!cat.is_transparent("minecraft:stone"));
        assert!(cat.get("minecraft:unknown").is_none());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(TextureCatalog::from_toml_str("blocks = 3").is_err());
    }
}
