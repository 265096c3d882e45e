// -----------------------------------------------------------------------------
// Automatic temperature calibration
// -----------------------------------------------------------------------------
//
// A bounded pre-pass draws proposals against the window's starting state,
// scores them without applying anything and keeps the uphill deltas. The
// temperatures are then chosen so the expected uphill acceptance ratio hits
// the configured initial/final targets.

use rand::prelude::*;
use rand_pcg::Pcg64Mcg;
use tracing::{debug, info};

use crate::config::{AutoTempMethod, TemperatureOptions};
use super::canvas::FrameCanvas;
use super::mutation::PerturbationEngine;
use super::scheduler::MoveScheduler;

/// `cost` method: start temperature as a fraction of the window baseline.
const COST_START_RATIO: f64 = 1e-2;
/// `cost` method: end temperature as a fraction of the start temperature.
const COST_END_RATIO: f64 = 1e-2;
/// Used when nothing else yields a valid pair.
const FALLBACK_TEMPS: (f64, f64) = (1.0, 1e-3);

/// Uphill cost deltas of `samples` proposals scored against `canvases`.
/// Nothing is applied, so the canvases are left exactly as they were.
pub(crate) fn sample_uphill_deltas<R: Rng>(
    rng: &mut R,
    canvases: &[FrameCanvas],
    engine: &PerturbationEngine,
    scheduler: &MoveScheduler,
    structural: bool,
    samples: usize,
) -> Vec<f64> {
    let mut deltas = Vec::new();
    for _ in 0..samples {
        let kind = scheduler.sample_kind(rng);
        let Ok(Some(proposal)) = engine.propose(rng, canvases, structural, kind) else { continue };
        if let Ok(eval) = canvases[proposal.frame].evaluate(proposal.change) {
            if eval.delta > 0.0 {
                deltas.push(eval.delta);
            }
        }
    }
    deltas
}

fn mean_acceptance(deltas: &[f64], temp: f64) -> f64 {
    deltas.iter().map(|d| (-d / temp).exp()).sum::<f64>() / deltas.len() as f64
}

/// Temperature at which the mean Boltzmann factor over `deltas` equals `chi`.
pub fn temperature_for_acceptance(deltas: &[f64], chi: f64) -> Option<f64> {
    if deltas.is_empty() || !(chi > 0.0 && chi < 1.0) {
        return None;
    }
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    if !(mean > 0.0 && mean.is_finite()) {
        return None;
    }
    let mut hi = mean;
    let mut guard = 0;
    while mean_acceptance(deltas, hi) < chi {
        hi *= 2.0;
        guard += 1;
        if guard > 200 {
            return None;
        }
    }
    let mut lo = hi;
    while mean_acceptance(deltas, lo) > chi {
        lo /= 2.0;
        guard += 1;
        if guard > 400 {
            return None;
        }
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if mean_acceptance(deltas, mid) < chi {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}

/// Closed form `-mean(delta) / ln(chi)`.
pub fn const_temperature(deltas: &[f64], chi: f64) -> Option<f64> {
    if deltas.is_empty() || !(chi > 0.0 && chi < 1.0) {
        return None;
    }
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    let t = -mean / chi.ln();
    (t.is_finite() && t > 0.0).then_some(t)
}

/// Force `start > end > 0`.
pub(crate) fn sanitize(start: f64, end: f64) -> (f64, f64) {
    let start = if start.is_finite() && start > 0.0 { start } else { FALLBACK_TEMPS.0 };
    let end = if end.is_finite() && end > 0.0 && end < start { end } else { start * FALLBACK_TEMPS.1 };
    (start, end)
}

fn cost_temperatures(baseline: f64) -> (f64, f64) {
    let start = baseline * COST_START_RATIO;
    sanitize(start, start * COST_END_RATIO)
}

/// Window state the calibration pre-pass reads.
pub(crate) struct CalibrationInput<'a> {
    pub(crate) canvases: &'a [FrameCanvas],
    pub(crate) engine: &'a PerturbationEngine,
    pub(crate) scheduler: &'a MoveScheduler,
    pub(crate) structural: bool,
    pub(crate) baseline: f64,
    pub(crate) window_end: isize,
}

/// Decides the start/end temperatures of every window.
pub(crate) struct TemperatureController {
    opts: TemperatureOptions,
    rng: Pcg64Mcg,
    calibrated: Option<(f64, f64)>,
    baseline_at_calibration: f64,
}

impl TemperatureController {
    pub(crate) fn new(opts: TemperatureOptions, seed: u64) -> Self {
        Self { opts, rng: Pcg64Mcg::seed_from_u64(seed), calibrated: None, baseline_at_calibration: 0.0 }
    }

    pub(crate) fn temperatures(&mut self, input: &CalibrationInput<'_>) -> (f64, f64) {
        if !self.opts.auto_temp {
            let start = self.opts.start_temp.unwrap_or(FALLBACK_TEMPS.0);
            let end = self.opts.end_temp.unwrap_or(start * FALLBACK_TEMPS.1);
            return sanitize(start, end);
        }
        let Some(previous) = self.calibrated else {
            return self.calibrate(input, "initial");
        };
        match self.opts.method {
            AutoTempMethod::None => previous,
            AutoTempMethod::Frame => {
                let period = self.opts.frame_interval as isize;
                if input.window_end.rem_euclid(period) == 0 {
                    self.calibrate(input, "periodic")
                } else {
                    previous
                }
            }
            AutoTempMethod::Factor => {
                if self.baseline_at_calibration > 0.0 && input.baseline > 0.0 {
                    let ratio = input.baseline / self.baseline_at_calibration;
                    sanitize(previous.0 * ratio, previous.1 * ratio)
                } else {
                    previous
                }
            }
            AutoTempMethod::Const | AutoTempMethod::Cost => self.calibrate(input, "per-window"),
        }
    }

    fn calibrate(&mut self, input: &CalibrationInput<'_>, reason: &str) -> (f64, f64) {
        let temps = match self.opts.method {
            AutoTempMethod::Cost => cost_temperatures(input.baseline),
            AutoTempMethod::Const => {
                let deltas = self.sample(input);
                match (
                    const_temperature(&deltas, self.opts.initial_acceptance),
                    const_temperature(&deltas, self.opts.final_acceptance),
                ) {
                    (Some(s), Some(e)) => sanitize(s, e),
                    _ => cost_temperatures(input.baseline),
                }
            }
            AutoTempMethod::None | AutoTempMethod::Frame | AutoTempMethod::Factor => {
                let deltas = self.sample(input);
                match (
                    temperature_for_acceptance(&deltas, self.opts.initial_acceptance),
                    temperature_for_acceptance(&deltas, self.opts.final_acceptance),
                ) {
                    (Some(s), Some(e)) => sanitize(s, e),
                    _ => {
                        debug!(samples = deltas.len(), "no usable uphill samples, using cost heuristic");
                        cost_temperatures(input.baseline)
                    }
                }
            }
        };
        info!(
            reason,
            method = ?self.opts.method,
            start_temp = temps.0,
            end_temp = temps.1,
            "calibrated temperatures"
        );
        self.calibrated = Some(temps);
        self.baseline_at_calibration = input.baseline;
        temps
    }

    fn sample(&mut self, input: &CalibrationInput<'_>) -> Vec<f64> {
        sample_uphill_deltas(
            &mut self.rng,
            input.canvases,
            input.engine,
            input.scheduler,
            input.structural,
            self.opts.calibration_samples,
        )
    }
}
