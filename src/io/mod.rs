// io/mod.rs
mod images;
mod lineage_log;
mod output;

pub use images::{format_pattern, load_grayscale, FrameRange, ImageSequence};
pub use lineage_log::{read_committed, read_initial_cells, LineageLog, LineageRow, LINEAGE_FILE};
pub use output::{render_bestfit, render_overlay, render_residual, FileSink, OutputDirs};
