use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_blocks::TextureSource;
use strata_cache::{
    CacheError, ChecksumStore, DB_FILE, JsonChecksumDb, SettingsRow, UPDATE_DB_FILE,
    backup_file_name,
};
use strata_chunk::SubchunkDecoder;
use strata_render::{RenderSettings, TileFormat, clamp_chunks_per_dimension};
use strata_world::{ChunkBounds, StoreError, WorldStore, collect_subchunk_keys, group_subchunks};

use crate::pipeline::{PipelineError, PipelineReport, ProgressFn, RenderPipeline};
use crate::pyramid::{PyramidProgressFn, PyramidReport, TileBounds, ZoomPyramidBuilder};
use crate::tiles::{FINEST_ZOOM, TileStore, TileStoreError};

#[derive(Debug)]
pub enum SessionError {
    World(StoreError),
    Cache(CacheError),
    Tiles(TileStoreError),
    Pipeline(PipelineError),
    Io(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::World(e) => write!(f, "{}", e),
            SessionError::Cache(e) => write!(f, "{}", e),
            SessionError::Tiles(e) => write!(f, "{}", e),
            SessionError::Pipeline(e) => write!(f, "render pipeline failed: {}", e),
            SessionError::Io(e) => write!(f, "output i/o error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::World(e) => Some(e),
            SessionError::Cache(e) => Some(e),
            SessionError::Tiles(e) => Some(e),
            SessionError::Pipeline(e) => Some(e),
            SessionError::Io(e) => Some(e),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::World(e)
    }
}

impl From<CacheError> for SessionError {
    fn from(e: CacheError) -> Self {
        SessionError::Cache(e)
    }
}

impl From<TileStoreError> for SessionError {
    fn from(e: TileStoreError) -> Self {
        SessionError::Tiles(e)
    }
}

impl From<PipelineError> for SessionError {
    fn from(e: PipelineError) -> Self {
        SessionError::Pipeline(e)
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub output_root: PathBuf,
    pub dimension: i32,
    pub settings: RenderSettings,
    /// Chunk rectangle to render; everything when unset.
    pub limits: Option<ChunkBounds>,
    /// Clear leftovers of an interrupted run from the update tree first.
    pub delete_existing_update_folder: bool,
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub incremental: bool,
    /// Settings in effect after persisted overrides.
    pub settings: RenderSettings,
    pub min_zoom: i32,
    pub max_zoom: i32,
    pub pipeline: PipelineReport,
    pub pyramid: PyramidReport,
    /// Where the previous database was rotated to.
    pub backup: Option<PathBuf>,
    pub promoted: usize,
}

/// Pyramid levels below the finest one for an area `extent` tiles across.
pub fn zoom_levels(extent: i32) -> i32 {
    let mut levels = 0;
    while (1i64 << levels) < extent.max(1) as i64 {
        levels += 1;
    }
    levels.max(1)
}

/// One render of one (dimension, profile) map into an output root.
pub struct MapSession {
    options: SessionOptions,
    progress: Option<ProgressFn>,
    pyramid_progress: Option<PyramidProgressFn>,
}

impl MapSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            progress: None,
            pyramid_progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_pyramid_progress(mut self, progress: PyramidProgressFn) -> Self {
        self.pyramid_progress = Some(progress);
        self
    }

    pub fn live_db_path(&self) -> PathBuf {
        self.options.output_root.join(DB_FILE)
    }

    pub fn scratch_db_path(&self) -> PathBuf {
        self.options.output_root.join(UPDATE_DB_FILE)
    }

    /// Prepares the scratch database. Returns it and whether a previous run
    /// exists.
    fn open_scratch(&self) -> Result<(JsonChecksumDb, bool), SessionError> {
        fs::create_dir_all(&self.options.output_root)?;
        let live = self.live_db_path();
        let scratch = self.scratch_db_path();
        if scratch.exists() {
            log::info!("removing stale {}", scratch.display());
            fs::remove_file(&scratch)?;
        }
        let incremental = live.exists();
        if incremental {
            fs::copy(&live, &scratch)?;
        }
        Ok((JsonChecksumDb::open(&scratch)?, incremental))
    }

    /// Persisted settings of this map win over the requested ones so tiles
    /// of successive runs stay compatible.
    fn settle_settings(&self, db: &dyn ChecksumStore) -> RenderSettings {
        let mut settings = self.options.settings.clone();
        let profile = settings.profile.name();
        match db.settings(self.options.dimension, profile) {
            Some(row) => {
                match row.format.parse::<TileFormat>() {
                    Ok(format) => settings.format = format,
                    Err(e) => log::warn!("ignoring stored format: {}", e),
                }
                settings.quality = row.quality;
                settings.chunks_per_dimension = row.chunks_per_dimension;
                log::info!(
                    "using stored settings for dim {} {}: {} q{} {} chunks per tile",
                    self.options.dimension,
                    profile,
                    settings.format,
                    settings.quality,
                    settings.chunks_per_dimension
                );
            }
            None => {
                if let Some(other) = db.any_settings() {
                    settings.chunks_per_dimension = other.chunks_per_dimension;
                }
            }
        }
        settings.chunks_per_dimension = clamp_chunks_per_dimension(settings.chunks_per_dimension);
        settings
    }

    pub fn run(
        &self,
        world: Arc<dyn WorldStore>,
        decoder: Arc<dyn SubchunkDecoder>,
        textures: Arc<dyn TextureSource>,
    ) -> Result<SessionReport, SessionError> {
        let opts = &self.options;
        let (mut db, incremental) = self.open_scratch()?;
        let settings = self.settle_settings(&db);
        let tiles = TileStore::new(
            &opts.output_root,
            opts.dimension,
            settings.profile,
            settings.format,
            settings.quality,
            incremental,
        );
        if incremental && opts.delete_existing_update_folder {
            tiles.clear_update_tree()?;
        }

        let keys = collect_subchunk_keys(world.as_ref(), opts.dimension)?;
        let group_size = settings.chunks_per_dimension as i32;
        let groups = group_subchunks(keys, group_size, opts.limits.as_ref());
        let bounds = TileBounds::from_groups(&groups);

        let previous = db.settings(opts.dimension, settings.profile.name());
        let computed_min = bounds
            .map(|b| FINEST_ZOOM - zoom_levels(b.width().max(b.height())))
            .unwrap_or(FINEST_ZOOM - 1);
        let min_zoom = previous.map_or(computed_min, |p| p.min_zoom.min(computed_min));
        db.put_settings(SettingsRow {
            dimension: opts.dimension,
            profile: settings.profile.name().to_string(),
            format: settings.format.name().to_string(),
            quality: settings.quality,
            chunks_per_dimension: settings.chunks_per_dimension,
            min_zoom,
            max_zoom: FINEST_ZOOM,
        })?;
        log::info!(
            "dim {} {}: {} tiles, zoom {}..={}{}",
            opts.dimension,
            settings.profile.name(),
            groups.len(),
            min_zoom,
            FINEST_ZOOM,
            if incremental { " (incremental)" } else { "" }
        );

        let mut pipeline = RenderPipeline::new(world, decoder, textures, settings.clone(), tiles.clone());
        if let Some(progress) = &self.progress {
            pipeline = pipeline.with_progress(Arc::clone(progress));
        }
        let (pipeline_report, store) = pipeline.run(groups, Box::new(db))?;
        drop(store);

        let pyramid_report = match bounds {
            Some(bounds) => {
                let mut builder = ZoomPyramidBuilder::new(
                    tiles.clone(),
                    Arc::clone(pipeline.tile_pool()),
                    settings.threads,
                );
                if let Some(progress) = &self.pyramid_progress {
                    builder = builder.with_progress(Arc::clone(progress));
                }
                builder.build(bounds, FINEST_ZOOM, min_zoom)
            }
            None => PyramidReport::default(),
        };

        // Tiles first: a database naming tiles that never reached map/ would
        // keep them from being rendered again.
        let promoted = tiles.promote_update_tree()?;
        let backup = self.promote_db()?;

        Ok(SessionReport {
            incremental,
            settings,
            min_zoom,
            max_zoom: FINEST_ZOOM,
            pipeline: pipeline_report,
            pyramid: pyramid_report,
            backup,
            promoted,
        })
    }

    /// Rotates the live database to a timestamped backup and moves the
    /// scratch database in its place.
    fn promote_db(&self) -> Result<Option<PathBuf>, SessionError> {
        let live = self.live_db_path();
        let scratch = self.scratch_db_path();
        let backup = if live.exists() {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
            let path = unique_backup(&self.options.output_root, &stamp);
            fs::rename(&live, &path)?;
            log::info!("previous database kept as {}", path.display());
            Some(path)
        } else {
            None
        };
        fs::rename(&scratch, &live)?;
        Ok(backup)
    }
}

/// Backup path for `stamp`, suffixed when two runs land in the same second.
fn unique_backup(root: &Path, stamp: &str) -> PathBuf {
    let path = root.join(backup_file_name(stamp));
    if !path.exists() {
        return path;
    }
    (1..)
        .map(|n| root.join(backup_file_name(&format!("{}-{}", stamp, n))))
        .find(|p| !p.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_render::MAX_CHUNKS_PER_DIMENSION;

    #[test]
    fn zoom_levels_cover_the_extent() {
        assert_eq!(zoom_levels(0), 1);
        assert_eq!(zoom_levels(1), 1);
        assert_eq!(zoom_levels(2), 1);
        assert_eq!(zoom_levels(3), 2);
        assert_eq!(zoom_levels(4), 2);
        assert_eq!(zoom_levels(5), 3);
        assert_eq!(zoom_levels(1024), 10);
    }

    #[test]
    fn backups_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_backup(dir.path(), "20260101-000000");
        assert!(first.ends_with("chunks-backup-20260101-000000.json"));
        fs::write(&first, "{}").unwrap();
        let second = unique_backup(dir.path(), "20260101-000000");
        assert!(second.ends_with("chunks-backup-20260101-000000-1.json"));
    }

    #[test]
    fn stored_chunks_per_dimension_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = JsonChecksumDb::open(dir.path().join(DB_FILE)).unwrap();
        db.put_settings(SettingsRow {
            dimension: 0,
            profile: "default".to_string(),
            format: "png".to_string(),
            quality: 90,
            chunks_per_dimension: 100_000,
            min_zoom: 19,
            max_zoom: FINEST_ZOOM,
        })
        .unwrap();
        let session = MapSession::new(SessionOptions {
            output_root: dir.path().to_path_buf(),
            dimension: 0,
            settings: RenderSettings::default(),
            limits: None,
            delete_existing_update_folder: false,
        });
        let settings = session.settle_settings(&db);
        assert_eq!(settings.chunks_per_dimension, MAX_CHUNKS_PER_DIMENSION);
        assert_eq!(settings.quality, 90);
    }
}
