use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::RgbaImage;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use strata_render::canvas;
use strata_world::TileGroup;

use crate::pool::TilePool;
use crate::tiles::TileStore;

/// Inclusive rectangle of tile coordinates at one zoom level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl TileBounds {
    pub fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            max_x: min_x.max(max_x),
            min_z: min_z.min(max_z),
            max_z: min_z.max(max_z),
        }
    }

    /// Finest-level tiles covered by `groups`.
    pub fn from_groups(groups: &[TileGroup]) -> Option<Self> {
        let first = groups.first()?;
        let mut b = TileBounds::new(first.tile_x(), first.tile_x(), first.tile_z(), first.tile_z());
        for g in &groups[1..] {
            b.min_x = b.min_x.min(g.tile_x());
            b.max_x = b.max_x.max(g.tile_x());
            b.min_z = b.min_z.min(g.tile_z());
            b.max_z = b.max_z.max(g.tile_z());
        }
        Some(b)
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i32 {
        self.max_z - self.min_z + 1
    }

    /// Min rounded down, max rounded up, both to even numbers.
    pub fn expand_even(&self) -> Self {
        let down = |v: i32| v - v.rem_euclid(2);
        let up = |v: i32| v + v.rem_euclid(2);
        Self {
            min_x: down(self.min_x),
            max_x: up(self.max_x),
            min_z: down(self.min_z),
            max_z: up(self.max_z),
        }
    }

    /// Bounds of the parent level.
    pub fn halve(&self) -> Self {
        Self {
            min_x: self.min_x.div_euclid(2),
            max_x: self.max_x.div_euclid(2),
            min_z: self.min_z.div_euclid(2),
            max_z: self.max_z.div_euclid(2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelStats {
    /// Zoom level written.
    pub zoom: i32,
    pub tiles: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PyramidReport {
    pub levels: Vec<LevelStats>,
}

impl PyramidReport {
    pub fn tiles(&self) -> usize {
        self.levels.iter().map(|l| l.tiles).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PyramidProgress {
    /// Zoom level being written.
    pub zoom: i32,
    pub lines_done: usize,
    pub lines_total: usize,
}

pub type PyramidProgressFn = Arc<dyn Fn(PyramidProgress) + Send + Sync>;

/// Builds the coarser zoom levels by merging 2x2 child tiles into one parent.
pub struct ZoomPyramidBuilder {
    tiles: TileStore,
    pool: Arc<TilePool>,
    threads: usize,
    progress: Option<PyramidProgressFn>,
}

impl ZoomPyramidBuilder {
    pub fn new(tiles: TileStore, pool: Arc<TilePool>, threads: usize) -> Self {
        Self {
            tiles,
            pool,
            threads: threads.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: PyramidProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Writes levels `from_zoom - 1` down to `min_zoom`. `bounds` are the
    /// tiles at `from_zoom`.
    pub fn build(&self, bounds: TileBounds, from_zoom: i32, min_zoom: i32) -> PyramidReport {
        let mut report = PyramidReport::default();
        let workers = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("strata-pyramid-{i}"))
            .build()
            .expect("pyramid pool");

        let mut bounds = bounds;
        let mut zoom = from_zoom;
        while zoom > min_zoom {
            let level = bounds.expand_even();
            let xs: Vec<i32> = (level.min_x..=level.max_x).step_by(2).collect();
            let written = AtomicUsize::new(0);
            let lines = AtomicUsize::new(0);
            workers.install(|| {
                xs.par_iter().for_each(|&x| {
                    for z in (level.min_z..=level.max_z).step_by(2) {
                        if self.merge(zoom, x, z) {
                            written.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    let done = lines.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &self.progress {
                        progress(PyramidProgress {
                            zoom: zoom - 1,
                            lines_done: done,
                            lines_total: xs.len(),
                        });
                    }
                });
            });
            let tiles = written.into_inner();
            log::info!(
                target: "pyramid",
                "zoom {}: {} tiles from x {}..={}, z {}..={}",
                zoom - 1,
                tiles,
                level.min_x,
                level.max_x,
                level.min_z,
                level.max_z
            );
            report.levels.push(LevelStats {
                zoom: zoom - 1,
                tiles,
            });
            bounds = level.halve();
            zoom -= 1;
        }
        report
    }

    /// Children of the parent at `(zoom - 1, x / 2, z / 2)`, in quadrant order
    /// north-west, north-east, south-west, south-east. In an incremental run
    /// only parents with a staged child are rebuilt.
    fn children(&self, zoom: i32, x: i32, z: i32) -> Option<[Option<RgbaImage>; 4]> {
        let at = [(x, z), (x + 1, z), (x, z + 1), (x + 1, z + 1)];
        if self.tiles.update_dir().is_some() {
            let mut staged = at.map(|(cx, cz)| self.tiles.load_update(zoom, cx, cz));
            if staged.iter().all(Option::is_none) {
                return None;
            }
            for (slot, (cx, cz)) in staged.iter_mut().zip(at) {
                if slot.is_none() {
                    *slot = self.tiles.load_update_first(zoom, cx, cz);
                }
            }
            Some(staged)
        } else {
            let found = at.map(|(cx, cz)| self.tiles.load_update_first(zoom, cx, cz));
            (!found.iter().all(Option::is_none)).then_some(found)
        }
    }

    fn merge(&self, zoom: i32, x: i32, z: i32) -> bool {
        let Some(children) = self.children(zoom, x, z) else {
            return false;
        };
        let mut dest = self.pool.acquire();
        let half = dest.width() / 2;
        let offsets = [(0, 0), (half, 0), (0, half), (half, half)];
        for (child, (ox, oz)) in children.into_iter().zip(offsets) {
            if let Some(child) = child {
                canvas::draw_scaled(&mut dest, &child, ox as i64, oz as i64, half, half);
            }
        }
        let (px, pz) = (x.div_euclid(2), z.div_euclid(2));
        match self.tiles.save(&dest, zoom - 1, px, pz) {
            Ok(_) => true,
            Err(e) => {
                log::warn!(target: "pyramid", "tile {}/{}/{} not written: {}", zoom - 1, px, pz, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use strata_render::{Profile, TileFormat};

    #[test]
    fn even_expansion_and_halving() {
        let b = TileBounds::new(-3, 5, 1, 2).expand_even();
        assert_eq!(b, TileBounds::new(-4, 6, 0, 2));
        assert_eq!(b.halve(), TileBounds::new(-2, 3, 0, 1));
        assert_eq!(TileBounds::new(0, 7, 0, 0).width(), 8);
    }

    #[test]
    fn quadrants_hold_children_at_half_size() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = TileStore::new(dir.path(), 0, Profile::Default, TileFormat::Png, 95, false);
        let colors = [
            Rgba([255, 0, 0, 255]),
            Rgba([0, 255, 0, 255]),
            Rgba([0, 0, 255, 255]),
        ];
        tiles.save(&RgbaImage::from_pixel(8, 8, colors[0]), 20, 2, 4).unwrap();
        tiles.save(&RgbaImage::from_pixel(8, 8, colors[1]), 20, 3, 4).unwrap();
        tiles.save(&RgbaImage::from_pixel(8, 8, colors[2]), 20, 2, 5).unwrap();

        let builder = ZoomPyramidBuilder::new(tiles.clone(), TilePool::new(8, 4), 2);
        let report = builder.build(TileBounds::new(2, 3, 4, 5), 20, 19);
        assert_eq!(report.levels, vec![LevelStats { zoom: 19, tiles: 1 }]);

        let parent = tiles.load_update_first(19, 1, 2).unwrap();
        assert_eq!(parent.dimensions(), (8, 8));
        assert_eq!(parent.get_pixel(1, 1), &colors[0]);
        assert_eq!(parent.get_pixel(6, 1), &colors[1]);
        assert_eq!(parent.get_pixel(1, 6), &colors[2]);
        assert_eq!(parent.get_pixel(6, 6)[3], 0);
    }

    #[test]
    fn incremental_rebuild_only_touches_staged_parents() {
        let dir = tempfile::tempdir().unwrap();
        let base = TileStore::new(dir.path(), 0, Profile::Default, TileFormat::Png, 95, false);
        let red = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let blue = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255]));
        base.save(&red, 20, 0, 0).unwrap();
        base.save(&red, 20, 1, 0).unwrap();
        base.save(&red, 20, 4, 0).unwrap();

        let inc = TileStore::new(dir.path(), 0, Profile::Default, TileFormat::Png, 95, true);
        inc.save(&blue, 20, 1, 0).unwrap();
        let report = ZoomPyramidBuilder::new(inc.clone(), TilePool::new(4, 2), 1)
            .build(TileBounds::new(0, 4, 0, 0), 20, 19);
        assert_eq!(report.tiles(), 1);

        let parent = inc.load_update(19, 0, 0).unwrap();
        assert_eq!(parent.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(parent.get_pixel(3, 0), &Rgba([0, 0, 255, 255]));
        assert!(inc.load_update(19, 2, 0).is_none());
    }

    #[test]
    fn progress_reports_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = TileStore::new(dir.path(), 0, Profile::Default, TileFormat::Png, 95, false);
        tiles.save(&RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255])), 20, 0, 0).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let report = ZoomPyramidBuilder::new(tiles, TilePool::new(4, 2), 2)
            .with_progress(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }))
            .build(TileBounds::new(0, 3, 0, 0), 20, 18);
        // x lines 0, 2, 4 at zoom 20, then 0, 2 at zoom 19
        assert_eq!(seen.load(Ordering::Relaxed), 5);
        assert_eq!(report.levels.len(), 2);
        assert_eq!(report.tiles(), 2);
    }
}
