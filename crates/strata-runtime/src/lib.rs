//! Render orchestration: stage pools, tile output, zoom pyramid and run sessions.
#![forbid(unsafe_code)]

pub mod pipeline;
pub mod pool;
pub mod pyramid;
pub mod session;
pub mod stage;
pub mod tiles;

pub use pipeline::{
    COMMIT_BATCH, PipelineError, PipelineProgress, PipelineReport, ProgressFn, RenderPipeline,
};
pub use pool::{PooledTile, TilePool};
pub use pyramid::{
    LevelStats, PyramidProgress, PyramidProgressFn, PyramidReport, TileBounds, ZoomPyramidBuilder,
};
pub use session::{MapSession, SessionError, SessionOptions, SessionReport, zoom_levels};
pub use stage::{Stage, StageInput, StageStats, StageWorker};
pub use tiles::{FINEST_ZOOM, MAP_DIR, TileStore, TileStoreError, UPDATE_DIR};
