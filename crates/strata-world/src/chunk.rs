use std::sync::Arc;

use crate::block::BlockRecord;

/// Horizontal size of a chunk in blocks.
pub const CHUNK_WIDTH: usize = 16;

#[derive(Clone, Debug)]
pub struct ColumnEntry {
    pub y: i32,
    pub block: Arc<BlockRecord>,
}

/// Every block decoded at one (x, z) of a chunk, in decode order.
#[derive(Clone, Debug, Default)]
pub struct BlockColumn {
    entries: Vec<ColumnEntry>,
}

impl BlockColumn {
    #[inline]
    pub fn push(&mut self, y: i32, block: Arc<BlockRecord>) {
        self.entries.push(ColumnEntry { y, block });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[ColumnEntry] {
        &self.entries
    }

    /// Entries ordered from the sky down to bedrock.
    pub fn sky_to_bedrock(&self) -> Vec<&ColumnEntry> {
        let mut out: Vec<&ColumnEntry> = self.entries.iter().collect();
        out.sort_by(|a, b| b.y.cmp(&a.y));
        out
    }
}

/// All decoded columns of one 16x16 chunk. Columns are stored x-major so that
/// iteration visits them ordered by x, then z.
#[derive(Clone, Debug)]
pub struct ChunkData {
    pub x: i32,
    pub z: i32,
    columns: Vec<BlockColumn>,
}

impl ChunkData {
    pub fn new(x: i32, z: i32) -> Self {
        let mut columns = Vec::with_capacity(CHUNK_WIDTH * CHUNK_WIDTH);
        columns.resize_with(CHUNK_WIDTH * CHUNK_WIDTH, BlockColumn::default);
        Self { x, z, columns }
    }

    #[inline]
    pub fn idx(lx: usize, lz: usize) -> usize {
        lx * CHUNK_WIDTH + lz
    }

    #[inline]
    pub fn push(&mut self, lx: usize, y: i32, lz: usize, block: Arc<BlockRecord>) {
        debug_assert!(lx < CHUNK_WIDTH && lz < CHUNK_WIDTH);
        self.columns[Self::idx(lx, lz)].push(y, block);
    }

    #[inline]
    pub fn column(&self, lx: usize, lz: usize) -> &BlockColumn {
        &self.columns[Self::idx(lx, lz)]
    }

    /// `(lx, lz, column)` ordered by x, then z.
    pub fn columns(&self) -> impl Iterator<Item = (usize, usize, &BlockColumn)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (i / CHUNK_WIDTH, i % CHUNK_WIDTH, c))
    }

    pub fn block_count(&self) -> usize {
        self.columns.iter().map(BlockColumn::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(BlockColumn::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_iterate_x_major() {
        let chunk = ChunkData::new(0, 0);
        let order: Vec<(usize, usize)> = chunk.columns().map(|(x, z, _)| (x, z)).take(17).collect();
        assert_eq!(order[0], (0, 0));
        assert_eq!(order[1], (0, 1));
        assert_eq!(order[16], (1, 0));
    }

    #[test]
    fn sky_to_bedrock_sorts_descending() {
        let mut chunk = ChunkData::new(0, 0);
        let stone = Arc::new(BlockRecord::new("minecraft:stone"));
        for y in [3, 70, -12, 15] {
            chunk.push(2, y, 5, stone.clone());
        }
        let ys: Vec<i32> = chunk.column(2, 5).sky_to_bedrock().iter().map(|e| e.y).collect();
        assert_eq!(ys, vec![70, 15, 3, -12]);
        assert_eq!(chunk.block_count(), 4);
        assert!(chunk.column(0, 0).is_empty());
    }
}
