//! Fetch, render, persist and commit stages for the finest zoom level.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use strata_blocks::TextureSource;
use strata_cache::{CacheError, ChecksumRecord, ChecksumStore, SubchunkCache};
use strata_chunk::SubchunkDecoder;
use strata_render::{ChunkRenderer, MissingTexture, RenderSettings, TileFormat};
use strata_world::{CHUNK_WIDTH, TileGroup, WorldStore};

use crate::pool::{PooledTile, TilePool};
use crate::stage::{Stage, StageInput, StageWorker};
use crate::tiles::{FINEST_ZOOM, TileStore};

/// Checksum records committed per store call.
pub const COMMIT_BATCH: usize = 128;
/// Posts between two queue snapshots in the log.
const QUEUE_STAT_EVERY: usize = 1000;
const COMMIT_POLL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum PipelineError {
    /// The final flush of the checksum store failed.
    Store(CacheError),
    /// The commit stage exited without handing the store back.
    CommitLost,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Store(e) => write!(f, "checksum store: {}", e),
            PipelineError::CommitLost => write!(f, "commit stage exited without a result"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Store(e) => Some(e),
            PipelineError::CommitLost => None,
        }
    }
}

impl From<CacheError> for PipelineError {
    fn from(e: CacheError) -> Self {
        PipelineError::Store(e)
    }
}

/// Progress seen by the callback after each rendered group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineProgress {
    pub rendered_chunks: usize,
    pub total_chunks: usize,
}

pub type ProgressFn = Arc<dyn Fn(PipelineProgress) + Send + Sync>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub posted: usize,
    pub rendered: usize,
    /// Groups whose every subchunk matched its stored checksum.
    pub skipped: usize,
    /// Groups lost to a read, decode or persist failure, or a worker panic.
    pub dropped: usize,
    pub tiles_written: usize,
    pub inserts: usize,
    pub updates: usize,
    pub failed_batches: usize,
    pub missing_textures: Vec<MissingTexture>,
}

#[derive(Default)]
struct Counters {
    posted: AtomicUsize,
    rendered: AtomicUsize,
    rendered_chunks: AtomicUsize,
    skipped: AtomicUsize,
    dropped: AtomicUsize,
    tiles_written: AtomicUsize,
    inserts: AtomicUsize,
    updates: AtomicUsize,
    failed_batches: AtomicUsize,
}

#[inline]
fn bump(c: &AtomicUsize, n: usize) {
    c.fetch_add(n, Ordering::Relaxed);
}

#[inline]
fn read(c: &AtomicUsize) -> usize {
    c.load(Ordering::Relaxed)
}

struct RawChunk {
    x: i32,
    z: i32,
    subchunks: Vec<(i8, Vec<u8>)>,
}

struct RenderJob {
    tile_x: i32,
    tile_z: i32,
    origin_x: i32,
    origin_z: i32,
    chunks: Vec<RawChunk>,
    /// New or changed checksums, committed once the tile is on disk.
    records: Vec<ChecksumRecord>,
}

struct PersistJob {
    tile: PooledTile,
    tile_x: i32,
    tile_z: i32,
    records: Vec<ChecksumRecord>,
}

struct FetchWorker {
    world: Arc<dyn WorldStore>,
    snapshot: Arc<SubchunkCache>,
    profile: &'static str,
    force: bool,
    counters: Arc<Counters>,
    out: StageInput<RenderJob>,
}

impl FetchWorker {
    /// `None` when every subchunk matches its stored crc. Such a group is not
    /// sent downstream at all: its records already hold these crcs, so there
    /// is nothing to render or commit.
    fn fetch(&self, group: &TileGroup) -> Result<Option<RenderJob>, strata_world::StoreError> {
        let mut chunks = Vec::with_capacity(group.chunks.len());
        let mut records = Vec::new();
        let mut changed = false;
        for column in &group.chunks {
            let mut subchunks = Vec::with_capacity(column.subchunks.len());
            for key in &column.subchunks {
                let Some(bytes) = self.world.get(key.bytes())? else {
                    log::debug!(target: "pipeline", "subchunk {:?} vanished", key);
                    continue;
                };
                let crc = crc32fast::hash(&bytes);
                match self.snapshot.get(key.bytes()) {
                    Some(stored) if stored.crc32 == crc => {}
                    Some(stored) => {
                        let mut rec = ChecksumRecord::new(key.bytes(), crc, self.profile);
                        rec.id = Some(stored.id);
                        records.push(rec);
                        changed = true;
                    }
                    None => {
                        records.push(ChecksumRecord::new(key.bytes(), crc, self.profile));
                        changed = true;
                    }
                }
                subchunks.push((key.sub_y(), bytes));
            }
            chunks.push(RawChunk {
                x: column.x,
                z: column.z,
                subchunks,
            });
        }
        if !changed && !self.force {
            return Ok(None);
        }
        Ok(Some(RenderJob {
            tile_x: group.tile_x(),
            tile_z: group.tile_z(),
            origin_x: group.origin_x,
            origin_z: group.origin_z,
            chunks,
            records,
        }))
    }
}

impl StageWorker<TileGroup> for FetchWorker {
    fn process(&mut self, group: TileGroup) {
        match self.fetch(&group) {
            Ok(Some(job)) => {
                if !self.out.post(job) {
                    bump(&self.counters.dropped, 1);
                }
            }
            Ok(None) => bump(&self.counters.skipped, 1),
            Err(e) => {
                log::warn!(
                    target: "pipeline",
                    "tile {},{}: read failed: {}",
                    group.tile_x(),
                    group.tile_z(),
                    e
                );
                bump(&self.counters.dropped, 1);
            }
        }
    }
}

struct RenderWorker {
    renderer: ChunkRenderer,
    decoder: Arc<dyn SubchunkDecoder>,
    tiles: Arc<TilePool>,
    missing: Arc<Mutex<BTreeSet<MissingTexture>>>,
    progress: Option<ProgressFn>,
    total_chunks: usize,
    counters: Arc<Counters>,
    out: StageInput<PersistJob>,
}

impl StageWorker<RenderJob> for RenderWorker {
    fn process(&mut self, job: RenderJob) {
        let mut tile = self.tiles.acquire();
        let chunk_px = (CHUNK_WIDTH * CHUNK_WIDTH) as i64;
        for raw in &job.chunks {
            let subchunks: Vec<(i8, &[u8])> = raw
                .subchunks
                .iter()
                .map(|(y, bytes)| (*y, bytes.as_slice()))
                .collect();
            let chunk = match self.decoder.decode_chunk(raw.x, raw.z, &subchunks) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!(
                        target: "pipeline",
                        "tile {},{}: chunk {},{} failed to decode: {}",
                        job.tile_x,
                        job.tile_z,
                        raw.x,
                        raw.z,
                        e
                    );
                    bump(&self.counters.dropped, 1);
                    return;
                }
            };
            let x_offset = (raw.x - job.origin_x) as i64 * chunk_px;
            let z_offset = (raw.z - job.origin_z) as i64 * chunk_px;
            self.renderer.render(&mut tile, &chunk, x_offset, z_offset);
        }

        bump(&self.counters.rendered, 1);
        let done = self
            .counters
            .rendered_chunks
            .fetch_add(job.chunks.len(), Ordering::Relaxed)
            + job.chunks.len();
        if let Some(progress) = &self.progress {
            progress(PipelineProgress {
                rendered_chunks: done,
                total_chunks: self.total_chunks,
            });
        }
        let posted = self.out.post(PersistJob {
            tile,
            tile_x: job.tile_x,
            tile_z: job.tile_z,
            records: job.records,
        });
        if !posted {
            bump(&self.counters.dropped, 1);
        }
    }

    fn finish(&mut self) {
        let found = self.renderer.take_missing();
        if found.is_empty() {
            return;
        }
        if let Ok(mut all) = self.missing.lock() {
            all.extend(found);
        }
    }
}

struct PersistWorker {
    store: TileStore,
    counters: Arc<Counters>,
    out: StageInput<Vec<ChecksumRecord>>,
}

impl StageWorker<PersistJob> for PersistWorker {
    fn process(&mut self, job: PersistJob) {
        match self.store.save(&job.tile, FINEST_ZOOM, job.tile_x, job.tile_z) {
            Ok(path) => {
                log::trace!(target: "pipeline", "wrote {}", path.display());
                bump(&self.counters.tiles_written, 1);
                drop(job.tile);
                if !job.records.is_empty() && !self.out.post(job.records) {
                    log::warn!(target: "pipeline", "commit stage gone; checksums lost");
                }
            }
            Err(e) => {
                log::warn!(
                    target: "pipeline",
                    "tile {},{}: persist failed: {}",
                    job.tile_x,
                    job.tile_z,
                    e
                );
                bump(&self.counters.dropped, 1);
            }
        }
    }
}

type CommitResult = (Result<(), CacheError>, Box<dyn ChecksumStore>);

struct CommitWorker {
    store: Option<Box<dyn ChecksumStore>>,
    pending: Vec<ChecksumRecord>,
    counters: Arc<Counters>,
    done: Sender<CommitResult>,
}

impl CommitWorker {
    fn commit(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        while !self.pending.is_empty() {
            let n = self.pending.len().min(COMMIT_BATCH);
            let batch: Vec<ChecksumRecord> = self.pending.drain(..n).collect();
            let (updates, inserts): (Vec<_>, Vec<_>) =
                batch.into_iter().partition(ChecksumRecord::is_stored);
            if !inserts.is_empty() {
                match store.insert_batch(&inserts) {
                    Ok(n) => bump(&self.counters.inserts, n),
                    Err(e) => {
                        log::error!(target: "pipeline", "checksum insert batch failed: {}", e);
                        bump(&self.counters.failed_batches, 1);
                    }
                }
            }
            if !updates.is_empty() {
                match store.update_batch(&updates) {
                    Ok(n) => bump(&self.counters.updates, n),
                    Err(e) => {
                        log::error!(target: "pipeline", "checksum update batch failed: {}", e);
                        bump(&self.counters.failed_batches, 1);
                    }
                }
            }
        }
    }
}

impl StageWorker<Vec<ChecksumRecord>> for CommitWorker {
    fn process(&mut self, records: Vec<ChecksumRecord>) {
        self.pending.extend(records);
        if self.pending.len() >= COMMIT_BATCH {
            self.commit();
        }
    }

    fn finish(&mut self) {
        self.commit();
        if let Some(mut store) = self.store.take() {
            let flushed = store.flush();
            let _ = self.done.send((flushed, store));
        }
    }
}

/// Renders tile groups into finest-level tiles and commits the checksums of
/// every tile written.
pub struct RenderPipeline {
    world: Arc<dyn WorldStore>,
    decoder: Arc<dyn SubchunkDecoder>,
    textures: Arc<dyn TextureSource>,
    settings: RenderSettings,
    tiles: TileStore,
    pool: Arc<TilePool>,
    progress: Option<ProgressFn>,
}

impl RenderPipeline {
    pub fn new(
        world: Arc<dyn WorldStore>,
        decoder: Arc<dyn SubchunkDecoder>,
        textures: Arc<dyn TextureSource>,
        settings: RenderSettings,
        tiles: TileStore,
    ) -> Self {
        let workers = settings.threads.max(1);
        let pool = TilePool::new(settings.tile_size(), workers * 2 + queue_capacity(&settings));
        Self {
            world,
            decoder,
            textures,
            settings,
            tiles,
            pool,
            progress: None,
        }
    }

    /// Shares an existing tile pool instead of the one built by `new`.
    pub fn with_tile_pool(mut self, pool: Arc<TilePool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn tile_pool(&self) -> &Arc<TilePool> {
        &self.pool
    }

    /// Runs every group to completion. Returns the report and hands the
    /// checksum store back, flushed.
    pub fn run(
        &self,
        groups: Vec<TileGroup>,
        store: Box<dyn ChecksumStore>,
    ) -> Result<(PipelineReport, Box<dyn ChecksumStore>), PipelineError> {
        let profile = self.settings.profile.name();
        let snapshot = Arc::new(store.snapshot(profile));
        let counters = Arc::new(Counters::default());
        let missing = Arc::new(Mutex::new(BTreeSet::new()));
        let capacity = queue_capacity(&self.settings);
        let threads = self.settings.threads.max(1);
        let persist_workers = match self.settings.format {
            TileFormat::Webp => threads,
            _ => 2,
        };
        let total_chunks = groups.iter().map(|g| g.chunks.len()).sum();
        log::info!(
            target: "pipeline",
            "rendering {} tiles ({} chunks, {} cached checksums) with {} threads",
            groups.len(),
            total_chunks,
            snapshot.len(),
            threads
        );

        let (done_tx, done_rx) = bounded::<CommitResult>(1);
        let mut store = Some(store);
        let (commit_in, commit) = Stage::spawn("commit", 1, capacity, |_| CommitWorker {
            store: store.take(),
            pending: Vec::with_capacity(COMMIT_BATCH),
            counters: Arc::clone(&counters),
            done: done_tx.clone(),
        });
        drop(done_tx);

        let (persist_in, persist) = Stage::spawn("persist", persist_workers, capacity, |_| {
            PersistWorker {
                store: self.tiles.clone(),
                counters: Arc::clone(&counters),
                out: commit_in.clone(),
            }
        });
        drop(commit_in);

        let (render_in, render) = Stage::spawn("render", threads, capacity, |_| RenderWorker {
            renderer: ChunkRenderer::new(Arc::clone(&self.textures), &self.settings),
            decoder: Arc::clone(&self.decoder),
            tiles: Arc::clone(&self.pool),
            missing: Arc::clone(&missing),
            progress: self.progress.clone(),
            total_chunks,
            counters: Arc::clone(&counters),
            out: persist_in.clone(),
        });
        drop(persist_in);

        let (fetch_in, fetch) = Stage::spawn("fetch", 1, capacity, |_| FetchWorker {
            world: Arc::clone(&self.world),
            snapshot: Arc::clone(&snapshot),
            profile,
            force: self.settings.force_overwrite,
            counters: Arc::clone(&counters),
            out: render_in.clone(),
        });
        drop(render_in);

        let stages = [&fetch, &render, &persist, &commit];
        for group in groups {
            if !fetch_in.post(group) {
                break;
            }
            let posted = counters.posted.fetch_add(1, Ordering::Relaxed) + 1;
            if posted % QUEUE_STAT_EVERY == 0 {
                log_queue_stat(&stages);
            }
        }
        drop(fetch_in);

        let (flushed, store) = loop {
            match done_rx.recv_timeout(COMMIT_POLL) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) => log_queue_stat(&stages),
                Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::CommitLost),
            }
        };
        flushed?;

        // groups abandoned by a panicking worker never reach the commit stage
        let panicked: usize = [&fetch, &render, &persist]
            .iter()
            .map(|s| s.stats().panicked)
            .sum();
        let missing_textures = missing
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let report = PipelineReport {
            posted: read(&counters.posted),
            rendered: read(&counters.rendered),
            skipped: read(&counters.skipped),
            dropped: read(&counters.dropped) + panicked,
            tiles_written: read(&counters.tiles_written),
            inserts: read(&counters.inserts),
            updates: read(&counters.updates),
            failed_batches: read(&counters.failed_batches),
            missing_textures,
        };
        let cache = snapshot.stats();
        log::info!(
            target: "pipeline",
            "pipeline done: {} rendered, {} skipped, {} dropped, {} tiles, {} inserts, {} updates \
             (checksum hits {}, misses {})",
            report.rendered,
            report.skipped,
            report.dropped,
            report.tiles_written,
            report.inserts,
            report.updates,
            cache.hits,
            cache.misses
        );
        Ok((report, store))
    }
}

/// Queue depth of every stage: `min(2 * threads, max_queue)`.
fn queue_capacity(settings: &RenderSettings) -> usize {
    (settings.threads.max(1) * 2).min(settings.max_queue).max(1)
}

fn log_queue_stat(stages: &[&Stage]) {
    let line: Vec<String> = stages
        .iter()
        .map(|s| format!("{} {}", s.name(), s.stats()))
        .collect();
    log::info!(target: "pipeline", "Queue Stat: {}", line.join(", "));
}
