// -----------------------------------------------------------------------------
// Window driver: slide, dispatch, commit, emit
// -----------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{DerivedConfig, RunOptions, SimulationConfig};
use crate::error::{ConfigError, LineageError, RunError};
use super::canvas::FrameImage;
use super::coordinator::{rebase_alternate, Coordinator, WindowPlan};
use super::cost::frame_cost;
use super::job::DebugRecord;
use super::raster::render_synthetic;
use super::stats::RunStats;
use super::{CellMap, CellModel, Frame, Lineage, Plane};

/// Ordered input frames. Positions are relative to the first frame of the run.
pub trait FrameSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute number of the frame at position 0.
    fn first_number(&self) -> usize;

    fn file_name(&self, pos: usize) -> String;

    /// The unpadded real image.
    fn load(&self, pos: usize) -> Result<Plane, RunError>;
}

/// Everything downstream consumers get for a committed frame. Images are in
/// padded canvas space; `padding` says how much to strip.
pub struct CommittedFrame<'a> {
    pub frame: &'a Frame,
    pub real: &'a Plane,
    pub synthetic: &'a Plane,
    pub cell_map: &'a CellMap,
    pub cost: f64,
    pub padding: usize,
}

pub trait FrameSink {
    fn frame_committed(&mut self, committed: &CommittedFrame<'_>) -> Result<(), RunError>;

    fn debug_records(&mut self, _records: &[DebugRecord]) -> Result<(), RunError> {
        Ok(())
    }
}

/// How the lineage starts.
#[derive(Clone, Debug)]
pub enum InitialState {
    /// Cells of the first frame, in unpadded image coordinates.
    Cells(Vec<CellModel>),
    /// Frames committed by an earlier run, as `(file name, cells)` in
    /// unpadded coordinates starting at the source's first frame.
    Committed(Vec<(String, Vec<CellModel>)>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WindowReport {
    pub window_start: isize,
    pub window_end: isize,
    /// Absolute numbers of the frames optimised together.
    pub frames: Vec<usize>,
    pub baseline: f64,
    pub committed_cost: f64,
    pub winner: Option<usize>,
    pub iterations: usize,
    pub aborted_jobs: usize,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Absolute frame numbers in emission order.
    pub committed: Vec<usize>,
    pub windows: Vec<WindowReport>,
    pub stats: RunStats,
}

pub struct WindowDriver {
    config: DerivedConfig,
    sim: SimulationConfig,
    options: RunOptions,
    cancel: Arc<AtomicBool>,
    stats: Arc<Mutex<RunStats>>,
}

fn shifted(cells: Vec<CellModel>, pad: usize) -> Vec<CellModel> {
    let pad = pad as f64;
    cells
        .into_iter()
        .map(|mut c| {
            c.x += pad;
            c.y += pad;
            c
        })
        .collect()
}

impl WindowDriver {
    pub fn new(config: DerivedConfig, sim: SimulationConfig, options: RunOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            config,
            sim,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(RunStats::default())),
        })
    }

    /// Set to stop the run; the lineage keeps its last committed state.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn stats_handle(&self) -> Arc<Mutex<RunStats>> {
        Arc::clone(&self.stats)
    }

    fn initial_lineage<S: FrameSource>(&self, source: &S, initial: InitialState) -> Result<Lineage, RunError> {
        let pad = self.sim.padding;
        let first = source.first_number();
        let lineage = match initial {
            InitialState::Cells(cells) => {
                Lineage::seed(first, source.file_name(0), self.sim.clone(), shifted(cells, pad))
            }
            InitialState::Committed(frames) => {
                if frames.is_empty() {
                    return Err(RunError::Resume("lineage log holds no frame to resume from".into()));
                }
                if frames.len() > source.len() {
                    return Err(RunError::Resume(format!(
                        "{} committed frames but only {} input frames",
                        frames.len(),
                        source.len()
                    )));
                }
                let frames = frames.into_iter().map(|(name, cells)| (name, shifted(cells, pad))).collect();
                Lineage::restore(first, self.sim.clone(), frames)
            }
        };
        lineage.map_err(|source| RunError::Lineage { source, last_committed: None })
    }

    fn image<S: FrameSource>(
        &self,
        cache: &mut BTreeMap<usize, Arc<FrameImage>>,
        source: &S,
        pos: usize,
    ) -> Result<Arc<FrameImage>, RunError> {
        if let Some(img) = cache.get(&pos) {
            return Ok(Arc::clone(img));
        }
        let real = source.load(pos)?.padded(self.sim.padding, self.sim.background_color);
        let img = Arc::new(FrameImage::prepare(real, &self.config));
        cache.insert(pos, Arc::clone(&img));
        Ok(img)
    }

    /// Slide the window over every frame of `source`, committing and emitting
    /// frames strictly in order.
    pub fn run<S: FrameSource, K: FrameSink>(
        &self,
        source: &S,
        sink: &mut K,
        initial: InitialState,
    ) -> Result<RunSummary, RunError> {
        if source.is_empty() {
            return Err(ConfigError::Invalid("no input frames".into()).into());
        }
        let mut lineage = self.initial_lineage(source, initial)?;
        let mut coordinator =
            Coordinator::new(self.config.clone(), &self.options, self.cancel_handle(), self.stats_handle())?;
        info!(
            first_frame = source.first_number(),
            frames = source.len(),
            window = self.config.window_size,
            resumed_frames = lineage.committed_len(),
            cells = lineage.frame(0).map(Frame::active_count).unwrap_or(0),
            "starting run"
        );

        let n = source.len();
        let w = self.config.window_size as isize;
        let mut images: BTreeMap<usize, Arc<FrameImage>> = BTreeMap::new();
        let mut alternates: Vec<Vec<Frame>> = Vec::new();
        let mut prev_live: Range<usize> = 0..0;
        let mut windows = Vec::new();
        let mut committed = Vec::new();

        let fatal = |source: LineageError, lineage: &Lineage| RunError::Lineage {
            source,
            last_committed: lineage.last_committed().map(|f| f.number),
        };

        for window_start in (1 - w)..(n as isize) {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(RunError::Cancelled { last_committed: lineage.last_committed().map(|f| f.number) });
            }
            let window_end = window_start + w;
            let newest = window_end - 1;
            if newest >= 1 && (newest as usize) < n && newest as usize == lineage.len() {
                let pos = lineage.forward_copy(newest as usize - 1).map_err(|e| fatal(e, &lineage))?;
                lineage.set_file_name(pos, source.file_name(pos)).map_err(|e| fatal(e, &lineage))?;
            }

            let lo = (window_start.max(0) as usize).max(lineage.committed_len());
            let hi = (window_end.min(n as isize).max(0) as usize).min(lineage.len());
            if lo < hi {
                let live = lo..hi;
                let mut seeds = vec![lineage.snapshot(live.clone()).map_err(|e| fatal(e, &lineage))?];
                let before = alternates.len();
                seeds.extend(
                    std::mem::take(&mut alternates)
                        .into_iter()
                        .filter_map(|alt| rebase_alternate(alt, &prev_live, &live, &lineage)),
                );
                if seeds.len() - 1 < before {
                    debug!(dropped = before - (seeds.len() - 1), "alternates dropped");
                }
                let live_images = live
                    .clone()
                    .map(|p| self.image(&mut images, source, p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.after_frame(committed.last().copied()))?;

                let outcome = coordinator.optimize(WindowPlan {
                    window_start,
                    window_end,
                    seeds,
                    images: live_images,
                    structural: hi - 1 > 0,
                    last_committed: lineage.last_committed().map(|f| f.number),
                })?;

                let numbers: Vec<usize> = outcome.frames.iter().map(|f| f.number).collect();
                for (offset, frame) in outcome.frames.into_iter().enumerate() {
                    lineage.replace_live(lo + offset, frame).map_err(|e| fatal(e, &lineage))?;
                }
                sink.debug_records(&outcome.debug).map_err(|e| e.after_frame(committed.last().copied()))?;
                alternates = outcome.alternates;
                prev_live = live;
                windows.push(WindowReport {
                    window_start,
                    window_end,
                    frames: numbers,
                    baseline: outcome.baseline,
                    committed_cost: outcome.cost,
                    winner: outcome.winner,
                    iterations: outcome.iterations,
                    aborted_jobs: outcome.aborted,
                });
            }

            if window_start >= 0 {
                let pos = window_start as usize;
                if !lineage.is_committed(pos) {
                    lineage.commit(pos).map_err(|e| fatal(e, &lineage))?;
                }
                let last_emitted = committed.last().copied();
                let image = self.image(&mut images, source, pos).map_err(|e| e.after_frame(last_emitted))?;
                let frame = lineage.frame(pos).map_err(|e| fatal(e, &lineage))?;
                let number = self.emit(sink, frame, &image, last_emitted)?;
                committed.push(number);
                images.retain(|&p, _| p > pos);
            }
        }

        let stats = self.stats.lock().clone();
        info!(
            committed = committed.len(),
            windows = stats.windows_optimized,
            acceptance_percent = stats.acceptance_percent(),
            aborted_jobs = stats.jobs_aborted,
            splits = stats.totals.splits,
            merges = stats.totals.merges,
            "run finished"
        );
        Ok(RunSummary { committed, windows, stats })
    }

    fn emit<K: FrameSink>(
        &self,
        sink: &mut K,
        frame: &Frame,
        image: &FrameImage,
        last_emitted: Option<usize>,
    ) -> Result<usize, RunError> {
        let (synthetic, cell_map) = render_synthetic(frame.cells(), image.dims(), &frame.sim);
        let cost = frame_cost(&image.real, &synthetic, &cell_map, image.distance.as_ref(), &self.config.cost)
            .map_err(|source| RunError::Cost { source, last_committed: last_emitted })?;
        sink.frame_committed(&CommittedFrame {
            frame,
            real: &image.real,
            synthetic: &synthetic,
            cell_map: &cell_map,
            cost,
            padding: self.sim.padding,
        })
        .map_err(|e| e.after_frame(last_emitted))?;
        {
            let mut stats = self.stats.lock();
            stats.committed_frames += 1;
            stats.last_committed_frame = Some(frame.number);
            stats.push_cost_history(cost);
        }
        info!(frame = frame.number, file = %frame.file_name, cells = frame.active_count(), cost, "committed frame");
        Ok(frame.number)
    }
}
