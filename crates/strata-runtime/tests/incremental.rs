use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use strata_blocks::{ResolvedTextures, TextureAtlas, TextureCatalog, TextureRef};
use strata_chunk::{PaletteDecoder, PaletteLayer, encode_subchunk};
use strata_render::{RenderMode, RenderSettings, TileFormat};
use strata_runtime::{MapSession, SessionError, SessionOptions, SessionReport, TileStoreError};
use strata_world::{BlockRecord, MemoryStore, WorldKey};

fn textures() -> Arc<TextureAtlas> {
    let mut cat = TextureCatalog::new();
    cat.insert("minecraft:stone", ResolvedTextures::Layers(vec![TextureRef::new("stone.png")]));
    cat.insert("minecraft:dirt", ResolvedTextures::Layers(vec![TextureRef::new("dirt.png")]));
    let atlas = TextureAtlas::new("/nonexistent-texture-root", cat);
    atlas.insert_image("stone.png", RgbaImage::from_pixel(16, 16, Rgba([120, 120, 120, 255])));
    atlas.insert_image("dirt.png", RgbaImage::from_pixel(16, 16, Rgba([110, 80, 40, 255])));
    Arc::new(atlas)
}

fn subchunk(id: &str) -> Vec<u8> {
    let mut layer = PaletteLayer::uniform(BlockRecord::air());
    for x in 0..16 {
        for z in 0..16 {
            layer.set(x, 0, z, &BlockRecord::new(id));
        }
    }
    encode_subchunk(4, &[layer])
}

/// 4x4 chunks of stone: four 2x2-chunk tiles.
fn world() -> MemoryStore {
    let mut store = MemoryStore::new();
    for x in 0..4 {
        for z in 0..4 {
            store.insert(WorldKey::subchunk(x, z, 0, 4).bytes().to_vec(), subchunk("minecraft:stone"));
        }
    }
    store
}

fn options(out: &Path) -> SessionOptions {
    SessionOptions {
        output_root: out.to_path_buf(),
        dimension: 0,
        settings: RenderSettings {
            render_mode: RenderMode::Normal,
            threads: 2,
            ..RenderSettings::default()
        },
        limits: None,
        delete_existing_update_folder: false,
    }
}

fn run(world: &MemoryStore, opts: SessionOptions) -> Result<SessionReport, SessionError> {
    MapSession::new(opts).run(
        Arc::new(world.clone()),
        Arc::new(PaletteDecoder),
        textures(),
    )
}

fn tile(out: &Path, zoom: i32, x: i32, z: i32) -> Vec<u8> {
    fs::read(out.join(format!("map/dim0/{}/{}/{}.png", zoom, x, z))).unwrap()
}

#[test]
fn first_run_renders_everything_and_builds_the_pyramid() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let report = run(&world(), options(out)).unwrap();

    assert!(!report.incremental);
    assert_eq!(report.pipeline.posted, 4);
    assert_eq!(report.pipeline.rendered, 4);
    assert_eq!(report.pipeline.tiles_written, 4);
    assert_eq!(report.pipeline.inserts, 16);
    assert!(report.pipeline.missing_textures.is_empty());
    assert_eq!((report.min_zoom, report.max_zoom), (19, 20));
    assert_eq!(report.pyramid.tiles(), 1);
    assert!(report.backup.is_none());

    for (x, z) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        assert!(out.join(format!("map/dim0/20/{}/{}.png", x, z)).is_file());
    }
    let parent = image::open(out.join("map/dim0/19/0/0.png")).unwrap().to_rgba8();
    assert_eq!(parent.dimensions(), (512, 512));
    assert_eq!(parent.get_pixel(300, 300), &Rgba([120, 120, 120, 255]));
    assert!(out.join("chunks.json").is_file());
    assert!(!out.join("chunks-update.json").exists());
    assert!(!out.join("update").exists());
}

#[test]
fn unchanged_world_renders_nothing_the_second_time() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let world = world();
    run(&world, options(out)).unwrap();
    let before: Vec<Vec<u8>> = [(20, 0, 0), (20, 1, 1), (19, 0, 0)]
        .iter()
        .map(|&(zoom, x, z)| tile(out, zoom, x, z))
        .collect();

    let report = run(&world, options(out)).unwrap();
    assert!(report.incremental);
    assert_eq!(report.pipeline.rendered, 0);
    assert_eq!(report.pipeline.skipped, 4);
    assert_eq!(report.pipeline.tiles_written, 0);
    assert_eq!(report.pipeline.inserts + report.pipeline.updates, 0);
    assert_eq!(report.pyramid.tiles(), 0);
    assert_eq!(report.promoted, 0);
    assert!(report.backup.as_ref().is_some_and(|p| p.is_file()));

    let after: Vec<Vec<u8>> = [(20, 0, 0), (20, 1, 1), (19, 0, 0)]
        .iter()
        .map(|&(zoom, x, z)| tile(out, zoom, x, z))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn one_changed_subchunk_rerenders_only_its_tile() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let mut world = world();
    run(&world, options(out)).unwrap();
    let untouched = tile(out, 20, 1, 1);
    let old = tile(out, 20, 0, 0);

    world.insert(WorldKey::subchunk(1, 1, 0, 4).bytes().to_vec(), subchunk("minecraft:dirt"));
    let report = run(&world, options(out)).unwrap();
    assert_eq!(report.pipeline.rendered, 1);
    assert_eq!(report.pipeline.skipped, 3);
    assert_eq!(report.pipeline.updates, 1);
    assert_eq!(report.pipeline.inserts, 0);
    assert_eq!(report.pyramid.tiles(), 1);
    assert_eq!(report.promoted, 2);

    assert_eq!(tile(out, 20, 1, 1), untouched);
    assert_ne!(tile(out, 20, 0, 0), old);
    let changed = image::open(out.join("map/dim0/20/0/0.png")).unwrap().to_rgba8();
    assert_eq!(changed.get_pixel(256 + 8, 256 + 8), &Rgba([110, 80, 40, 255]));
    assert_eq!(changed.get_pixel(8, 8), &Rgba([120, 120, 120, 255]));
    assert!(!out.join("update").exists());

    // the change is now recorded, so a third run skips everything
    let report = run(&world, options(out)).unwrap();
    assert_eq!(report.pipeline.rendered, 0);
}

#[test]
fn stored_settings_override_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let world = world();
    run(&world, options(out)).unwrap();

    let mut opts = options(out);
    opts.settings.format = TileFormat::Jpeg;
    opts.settings.chunks_per_dimension = 4;
    let report = run(&world, opts).unwrap();
    assert_eq!(report.settings.format, TileFormat::Png);
    assert_eq!(report.settings.chunks_per_dimension, 2);
    assert_eq!(report.pipeline.skipped, 4);
}

#[test]
fn foreign_files_in_the_update_folder_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let world = world();
    run(&world, options(out)).unwrap();

    let stray = out.join("update/dim0/20/notes.txt");
    fs::create_dir_all(stray.parent().unwrap()).unwrap();
    fs::write(&stray, "not a tile").unwrap();

    let mut opts = options(out);
    opts.delete_existing_update_folder = true;
    let err = run(&world, opts).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Tiles(TileStoreError::ForeignFile(ref p)) if p == &stray
    ));
    assert!(stray.exists());
    assert!(out.join("chunks.json").is_file());
}

#[test]
fn limits_restrict_the_rendered_area() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let mut opts = options(out);
    opts.limits = Some(strata_world::ChunkBounds::new(0, 1, 0, 1));
    let report = run(&world(), opts).unwrap();
    assert_eq!(report.pipeline.rendered, 1);
    assert_eq!(report.pipeline.inserts, 4);
    assert!(!out.join("map/dim0/20/1/1.png").exists());
}
