// -----------------------------------------------------------------------------
// Parallel job coordinator: fan out J jobs, rank, keep K
// -----------------------------------------------------------------------------

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{DerivedConfig, RunOptions};
use crate::error::{ConfigError, RunError};
use super::annealer::{ScheduleKind, TemperatureSchedule};
use super::calibration::{CalibrationInput, TemperatureController};
use super::canvas::{FrameCanvas, FrameImage};
use super::job::{build_canvases, run_job, stream_seed, DebugRecord, JobContext, JobEnv, JobOutcome, JobStatus};
use super::mutation::PerturbationEngine;
use super::scheduler::MoveScheduler;
use super::selection::{select, SelectionStrategy};
use super::stats::RunStats;
use super::{Frame, Lineage};

/// Stream id of the calibration pre-pass, disjoint from job indices.
const CALIBRATION_STREAM: u64 = u64::MAX;
/// Temperatures used when a window has no iteration budget.
const IDLE_TEMPS: (f64, f64) = (1.0, 1e-3);

/// Executes jobs on a fixed-size pool, or inline when no pool is configured.
pub(crate) struct JobRunner {
    pool: Option<rayon::ThreadPool>,
}

impl JobRunner {
    pub(crate) fn new(workers: usize, parallel: bool) -> Result<Self, ConfigError> {
        if !parallel {
            return Ok(Self { pool: None });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cellanneal-job-{i}"))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to start worker pool: {e}")))?;
        Ok(Self { pool: Some(pool) })
    }

    /// Results come back in job order whatever order the jobs finish in.
    pub(crate) fn run(&self, contexts: Vec<JobContext>, env: &JobEnv<'_>) -> Vec<JobOutcome> {
        match &self.pool {
            Some(pool) => pool.install(|| contexts.into_par_iter().map(|ctx| run_job(ctx, env)).collect()),
            None => contexts.into_iter().map(|ctx| run_job(ctx, env)).collect(),
        }
    }
}

/// Input of one window dispatch.
pub(crate) struct WindowPlan {
    pub(crate) window_start: isize,
    pub(crate) window_end: isize,
    /// Seed frames; `seeds[0]` is the authoritative lineage state.
    pub(crate) seeds: Vec<Vec<Frame>>,
    pub(crate) images: Vec<Arc<FrameImage>>,
    pub(crate) structural: bool,
    pub(crate) last_committed: Option<usize>,
}

pub(crate) struct WindowOutcome {
    /// Frames to install into the lineage.
    pub(crate) frames: Vec<Frame>,
    pub(crate) cost: f64,
    pub(crate) baseline: f64,
    /// `None` when the baseline was kept.
    pub(crate) winner: Option<usize>,
    /// Retained non-winning candidates, in rank order.
    pub(crate) alternates: Vec<Vec<Frame>>,
    pub(crate) iterations: usize,
    pub(crate) aborted: usize,
    pub(crate) debug: Vec<DebugRecord>,
}

pub(crate) struct Coordinator {
    config: DerivedConfig,
    engine: PerturbationEngine,
    runner: JobRunner,
    temps: TemperatureController,
    jobs: usize,
    keep: usize,
    strategy: SelectionStrategy,
    seed: u64,
    debug_stride: Option<usize>,
    schedule: ScheduleKind,
    cancel: Arc<AtomicBool>,
    stats: Arc<Mutex<RunStats>>,
}

impl Coordinator {
    pub(crate) fn new(
        config: DerivedConfig,
        options: &RunOptions,
        cancel: Arc<AtomicBool>,
        stats: Arc<Mutex<RunStats>>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: PerturbationEngine::new(&config)?,
            runner: JobRunner::new(options.workers, options.parallel)?,
            temps: TemperatureController::new(
                options.temperature.clone(),
                stream_seed(options.seed, 0, CALIBRATION_STREAM),
            ),
            config,
            jobs: options.jobs,
            keep: options.keep,
            strategy: options.strategy,
            seed: options.seed,
            debug_stride: options.debug_stride,
            schedule: options.temperature.schedule,
            cancel,
            stats,
        })
    }

    fn all_aborted(&self, plan: &WindowPlan, reason: String) -> RunError {
        RunError::AllJobsAborted {
            window_start: plan.window_start,
            jobs: self.jobs,
            reason,
            last_committed: plan.last_committed,
        }
    }

    /// Run every job of a window and pick what gets committed. Nothing is
    /// written to the lineage here; a cancelled window returns an error.
    pub(crate) fn optimize(&mut self, plan: WindowPlan) -> Result<WindowOutcome, RunError> {
        let primary = plan.seeds.first().cloned().unwrap_or_default();
        let baseline_canvases = build_canvases(primary.clone(), &plan.images, &self.config)
            .map_err(|e| self.all_aborted(&plan, e.to_string()))?;
        let baseline: f64 = baseline_canvases.iter().map(FrameCanvas::total).sum();
        let active: usize = primary.iter().map(Frame::active_count).sum();
        let iterations = self.config.iteration_per_cell * active;

        let (start_temp, end_temp) = if iterations > 0 {
            let scheduler = MoveScheduler::new(self.config.split_probability, self.config.merge_probability);
            self.temps.temperatures(&CalibrationInput {
                canvases: &baseline_canvases,
                engine: &self.engine,
                scheduler: &scheduler,
                structural: plan.structural,
                baseline,
                window_end: plan.window_end,
            })
        } else {
            IDLE_TEMPS
        };
        drop(baseline_canvases);
        let schedule = TemperatureSchedule { start: start_temp, end: end_temp, kind: self.schedule };

        info!(
            window_start = plan.window_start,
            window_end = plan.window_end,
            frames = primary.len(),
            jobs = self.jobs,
            iterations,
            baseline,
            "dispatching window"
        );

        let contexts: Vec<JobContext> = (0..self.jobs)
            .map(|job| JobContext {
                job,
                window_start: plan.window_start,
                window_end: plan.window_end,
                frames: plan.seeds.get(job % plan.seeds.len().max(1)).cloned().unwrap_or_else(|| primary.clone()),
                images: plan.images.clone(),
                structural: plan.structural,
                iterations,
                schedule,
                seed: stream_seed(self.seed, plan.window_start, job as u64),
                debug_stride: self.debug_stride,
            })
            .collect();
        let env = JobEnv { config: &self.config, engine: &self.engine, cancel: &self.cancel };
        let mut outcomes = self.runner.run(contexts, &env);

        if self.cancel.load(Ordering::Relaxed) || outcomes.iter().any(|o| o.status == JobStatus::Cancelled) {
            return Err(RunError::Cancelled { last_committed: plan.last_committed });
        }

        let aborted: Vec<&JobOutcome> = outcomes.iter().filter(|o| !o.is_converged()).collect();
        for o in &aborted {
            warn!(job = o.job, status = ?o.status, "job excluded from ranking");
        }
        let aborted_count = aborted.len();
        if aborted_count == outcomes.len() {
            let reason = match aborted.first().map(|o| &o.status) {
                Some(JobStatus::Aborted(r)) => r.clone(),
                _ => "no job completed".to_string(),
            };
            return Err(self.all_aborted(&plan, reason));
        }

        let costs: Vec<Option<f64>> = outcomes.iter().map(|o| o.is_converged().then_some(o.cost)).collect();
        let retained = select(self.strategy, &costs, baseline, self.keep);
        let debug: Vec<DebugRecord> = outcomes.iter_mut().flat_map(|o| std::mem::take(&mut o.debug)).collect();

        {
            let mut stats = self.stats.lock();
            stats.windows_optimized += 1;
            stats.jobs_run += outcomes.len() as u64;
            stats.jobs_aborted += aborted_count as u64;
            for o in &outcomes {
                stats.totals.absorb(&o.stats);
            }
            if iterations > 0 {
                stats.start_temp = Some(start_temp);
                stats.end_temp = Some(end_temp);
            }
            if retained.is_empty() {
                stats.baseline_fallbacks += 1;
            }
        }

        let Some((&winner, rest)) = retained.split_first() else {
            info!(window_start = plan.window_start, baseline, "no candidate beat the baseline, keeping it");
            return Ok(WindowOutcome {
                frames: primary,
                cost: baseline,
                baseline,
                winner: None,
                alternates: Vec::new(),
                iterations,
                aborted: aborted_count,
                debug,
            });
        };
        let cost = outcomes[winner].cost;
        let alternates = rest.iter().map(|&j| std::mem::take(&mut outcomes[j].frames)).collect();
        info!(
            window_start = plan.window_start,
            strategy = %self.strategy,
            winner,
            cost,
            baseline,
            retained = retained.len(),
            "window selected"
        );
        Ok(WindowOutcome {
            frames: std::mem::take(&mut outcomes[winner].frames),
            cost,
            baseline,
            winner: Some(winner),
            alternates,
            iterations,
            aborted: aborted_count,
            debug,
        })
    }
}

/// Move a retained candidate from `prev_live` onto the next window's `live`
/// range: frames that have been committed are dropped, the first remaining
/// frame is relinked by name to the committed lineage, and missing newer
/// frames are forward-copied. Returns `None` if the candidate no longer fits.
pub(crate) fn rebase_alternate(
    frames: Vec<Frame>,
    prev_live: &Range<usize>,
    live: &Range<usize>,
    lineage: &Lineage,
) -> Option<Vec<Frame>> {
    if live.start < prev_live.start || live.start >= prev_live.end || frames.len() != prev_live.len() {
        return None;
    }
    let mut kept: Vec<Frame> = frames.into_iter().skip(live.start - prev_live.start).collect();
    if let Some(prev_pos) = live.start.checked_sub(1) {
        let prev = lineage.frame(prev_pos).ok()?;
        if let Err(e) = kept[0].relink_to(prev) {
            debug!(error = %e, "dropping alternate that no longer links to the committed frame");
            return None;
        }
    }
    while live.start + kept.len() < live.end {
        let pos = live.start + kept.len();
        let mut next = kept.last()?.successor();
        next.file_name = lineage.frame(pos).ok()?.file_name.clone();
        kept.push(next);
    }
    kept.truncate(live.len());
    Some(kept)
}
