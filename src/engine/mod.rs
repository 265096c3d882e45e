// engine/mod.rs
mod types;
mod geom;
mod cell;
mod lineage;
mod raster;
mod cost;
mod tile_grid;
mod canvas;
mod mutation;
mod scheduler;
mod annealer;
mod calibration;
mod stats;
mod job;
mod selection;
mod coordinator;
mod driver;

pub use types::{FrameDimensions, IntRect, Plane};
pub use cell::{CellDelta, CellModel, Footprint};
pub use lineage::{CellNode, Frame, Lineage};
pub use raster::{render_synthetic, CellMap};
pub use cost::{distance_weight_map, euclidean_distance_to_foreground, frame_cost, CostMode, CostParams};
pub use canvas::FrameImage;
pub use mutation::MoveKind;
pub use annealer::{ScheduleKind, TemperatureSchedule};
pub use calibration::{const_temperature, temperature_for_acceptance};
pub use stats::{JobStats, RunStats};
pub use job::{DebugRecord, JobStatus};
pub use selection::{select, SelectionStrategy};
pub use driver::{
    CommittedFrame, FrameSink, FrameSource, InitialState, RunSummary, WindowDriver, WindowReport,
};

// Make shared helpers available to submodules
pub(crate) use geom::{pad_and_clamp_rect, rect_from_bounds, union_rect};
pub(crate) use lineage::CellChange;
pub(crate) use tile_grid::{choose_tile_size, TileGrid};
