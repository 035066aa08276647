use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use image::RgbaImage;
use strata_render::canvas;

/// Bounded pool of same-sized tile buffers, reused across render jobs and
/// pyramid levels instead of reallocating one per tile.
pub struct TilePool {
    available_tx: Sender<RgbaImage>,
    available_rx: Receiver<RgbaImage>,
    allocated: AtomicUsize,
    reused: AtomicUsize,
    max_tiles: usize,
    tile_size: u32,
}

impl TilePool {
    pub fn new(tile_size: u32, max_tiles: usize) -> Arc<Self> {
        let max_tiles = max_tiles.max(1);
        let (tx, rx) = bounded(max_tiles);
        Arc::new(Self {
            available_tx: tx,
            available_rx: rx,
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            max_tiles,
            tile_size,
        })
    }

    pub fn with_capacity_from_workers(tile_size: u32, worker_count: usize) -> Arc<Self> {
        Self::new(tile_size, worker_count.max(1) * 2)
    }

    /// A cleared tile; blocks while every buffer is checked out.
    pub fn acquire(self: &Arc<Self>) -> PooledTile {
        if let Ok(img) = self.available_rx.try_recv() {
            return self.recycle(img);
        }

        loop {
            let current = self.allocated.load(Ordering::Acquire);
            if current < self.max_tiles {
                let prev = self.allocated.fetch_add(1, Ordering::AcqRel);
                if prev < self.max_tiles {
                    return PooledTile {
                        img: Some(canvas::empty(self.tile_size)),
                        pool: Arc::clone(self),
                    };
                }
                self.allocated.fetch_sub(1, Ordering::AcqRel);
            }

            match self.available_rx.recv() {
                Ok(img) => return self.recycle(img),
                Err(_) => continue,
            }
        }
    }

    fn recycle(self: &Arc<Self>, mut img: RgbaImage) -> PooledTile {
        canvas::clear(&mut img);
        self.reused.fetch_add(1, Ordering::Relaxed);
        PooledTile {
            img: Some(img),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, img: RgbaImage) {
        if img.dimensions() == (self.tile_size, self.tile_size) {
            let _ = self.available_tx.try_send(img);
        } else {
            self.allocated.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Buffers created so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Acquisitions served by a recycled buffer.
    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

/// A checked-out tile; goes back to its pool on drop.
pub struct PooledTile {
    img: Option<RgbaImage>,
    pool: Arc<TilePool>,
}

impl Deref for PooledTile {
    type Target = RgbaImage;

    fn deref(&self) -> &Self::Target {
        self.img.as_ref().expect("tile already released")
    }
}

impl DerefMut for PooledTile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.img.as_mut().expect("tile already released")
    }
}

impl Drop for PooledTile {
    fn drop(&mut self) {
        if let Some(img) = self.img.take() {
            self.pool.release(img);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn released_tiles_are_cleared_and_reused() {
        let pool = TilePool::new(8, 2);
        {
            let mut t = pool.acquire();
            t.put_pixel(1, 1, Rgba([1, 2, 3, 255]));
        }
        let t = pool.acquire();
        assert_eq!(t.get_pixel(1, 1)[3], 0);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.reused(), 1);
    }

    #[test]
    fn never_allocates_past_capacity() {
        let pool = TilePool::new(4, 2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.allocated(), 2);
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire().dimensions())
        };
        drop(a);
        assert_eq!(waiter.join().unwrap(), (4, 4));
        drop(b);
        assert_eq!(pool.allocated(), 2);
    }
}
