// -----------------------------------------------------------------------------
// One annealing job over the live frames of a window
// -----------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::DerivedConfig;
use crate::error::CostError;
use super::annealer::{Annealer, TemperatureSchedule};
use super::canvas::{FrameCanvas, FrameImage};
use super::mutation::PerturbationEngine;
use super::scheduler::MoveScheduler;
use super::stats::JobStats;
use super::{Frame, MoveKind};

#[derive(Clone, Debug, PartialEq)]
pub enum JobStatus {
    Running,
    /// Iteration budget exhausted.
    Converged,
    /// Cost evaluation failed; the job's result is discarded.
    Aborted(String),
    Cancelled,
}

/// One line of `debug.csv`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugRecord {
    pub window_start: isize,
    pub window_end: isize,
    pub pbad_total: f64,
    pub bad_count: u64,
    pub temperature: f64,
    pub total_cost_diff: f64,
    pub current_iteration: usize,
    pub total_iterations: usize,
}

/// Everything a job owns. Each job gets its own deep copy of the frames.
pub(crate) struct JobContext {
    pub(crate) job: usize,
    pub(crate) window_start: isize,
    pub(crate) window_end: isize,
    pub(crate) frames: Vec<Frame>,
    pub(crate) images: Vec<Arc<FrameImage>>,
    /// Split/merge moves are allowed in the newest frame.
    pub(crate) structural: bool,
    pub(crate) iterations: usize,
    pub(crate) schedule: TemperatureSchedule,
    pub(crate) seed: u64,
    pub(crate) debug_stride: Option<usize>,
}

/// Read-only state shared by the jobs of a window.
pub(crate) struct JobEnv<'a> {
    pub(crate) config: &'a DerivedConfig,
    pub(crate) engine: &'a PerturbationEngine,
    pub(crate) cancel: &'a AtomicBool,
}

pub(crate) struct JobOutcome {
    pub(crate) job: usize,
    pub(crate) status: JobStatus,
    pub(crate) frames: Vec<Frame>,
    /// Total over the live frames; infinite unless the job converged.
    pub(crate) cost: f64,
    pub(crate) stats: JobStats,
    pub(crate) debug: Vec<DebugRecord>,
}

impl JobOutcome {
    fn failed(job: usize, status: JobStatus, stats: JobStats, debug: Vec<DebugRecord>) -> Self {
        Self { job, status, frames: Vec::new(), cost: f64::INFINITY, stats, debug }
    }

    pub(crate) fn is_converged(&self) -> bool {
        self.status == JobStatus::Converged
    }
}

/// Derive an independent stream seed (splitmix64 finaliser over the inputs).
pub(crate) fn stream_seed(seed: u64, window_start: isize, stream: u64) -> u64 {
    let mut z = seed
        ^ (window_start as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ stream.wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub(crate) fn build_canvases(
    frames: Vec<Frame>,
    images: &[Arc<FrameImage>],
    config: &DerivedConfig,
) -> Result<Vec<FrameCanvas>, CostError> {
    frames
        .into_iter()
        .zip(images)
        .map(|(frame, image)| FrameCanvas::new(frame, Arc::clone(image), config.cost))
        .collect()
}

pub(crate) fn run_job(ctx: JobContext, env: &JobEnv<'_>) -> JobOutcome {
    let job = ctx.job;
    let mut stats = JobStats::default();
    let mut records = Vec::new();

    let mut canvases = match build_canvases(ctx.frames, &ctx.images, env.config) {
        Ok(c) => c,
        Err(e) => {
            warn!(job, error = %e, "job aborted while rendering its seed");
            return JobOutcome::failed(job, JobStatus::Aborted(e.to_string()), stats, records);
        }
    };

    let mut rng = Pcg64Mcg::seed_from_u64(ctx.seed);
    let mut scheduler = MoveScheduler::new(env.config.split_probability, env.config.merge_probability);
    let mut annealer = Annealer::new();
    let mut total_cost_diff = 0.0;
    let mut status = JobStatus::Running;

    for it in 0..ctx.iterations {
        if env.cancel.load(Ordering::Relaxed) {
            status = JobStatus::Cancelled;
            break;
        }
        let temperature = ctx.schedule.at(it, ctx.iterations);
        let requested = scheduler.sample_kind(&mut rng);

        match env.engine.propose(&mut rng, &canvases, ctx.structural, requested) {
            Ok(Some(proposal)) => match canvases[proposal.frame].evaluate(proposal.change) {
                Ok(eval) => {
                    let delta = eval.delta;
                    let accepted = annealer.should_accept(&mut rng, delta, temperature);
                    scheduler.record_outcome(proposal.kind, accepted);
                    stats.record(proposal.kind, accepted);
                    if accepted {
                        total_cost_diff += delta;
                        canvases[proposal.frame].apply(eval);
                    }
                }
                Err(e) => {
                    warn!(job, iteration = it, error = %e, "job aborted");
                    status = JobStatus::Aborted(e.to_string());
                    break;
                }
            },
            Ok(None) => stats.idle += 1,
            Err(e) => {
                trace!(job, error = %e, "dropped proposal");
                stats.dropped += 1;
            }
        }

        if let Some(stride) = ctx.debug_stride {
            if (it + 1) % stride == 0 || it + 1 == ctx.iterations {
                records.push(DebugRecord {
                    window_start: ctx.window_start,
                    window_end: ctx.window_end,
                    pbad_total: annealer.pbad_total(),
                    bad_count: annealer.bad_count(),
                    temperature,
                    total_cost_diff,
                    current_iteration: it + 1,
                    total_iterations: ctx.iterations,
                });
            }
        }
    }
    stats.uphill_attempts = annealer.bad_count();
    stats.uphill_accepts = annealer.accepted_uphill();

    if status != JobStatus::Running {
        return JobOutcome::failed(job, status, stats, records);
    }

    let cost: f64 = canvases.iter().map(FrameCanvas::total).sum();
    if !cost.is_finite() {
        let e = CostError::NonFinite { frame: canvases.first().map_or(0, |c| c.frame().number) };
        return JobOutcome::failed(job, JobStatus::Aborted(e.to_string()), stats, records);
    }
    debug!(
        job,
        cost,
        total_cost_diff,
        accepts = stats.accepts,
        proposals = stats.proposals,
        splits_proposed = scheduler.proposals(MoveKind::Split),
        splits_accepted = scheduler.accepts(MoveKind::Split),
        pose_rate = scheduler.acceptance_rates()[MoveKind::Pose.index()],
        "job converged"
    );
    let frames = canvases.into_iter().map(FrameCanvas::into_frame).collect();
    JobOutcome { job, status: JobStatus::Converged, frames, cost, stats, debug: records }
}
