// -----------------------------------------------------------------------------
// Simulated annealing helper
// -----------------------------------------------------------------------------

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of the temperature decay between `start` and `end`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Linear,
    #[default]
    Geometric,
}

/// Monotone temperature schedule over a fixed iteration budget.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemperatureSchedule {
    pub start: f64,
    pub end: f64,
    pub kind: ScheduleKind,
}

impl TemperatureSchedule {
    /// Temperature at `iteration` of `total`: `start` at the first iteration,
    /// `end` at the last.
    pub fn at(&self, iteration: usize, total: usize) -> f64 {
        let t = if total > 1 { iteration.min(total - 1) as f64 / (total - 1) as f64 } else { 0.0 };
        match self.kind {
            ScheduleKind::Linear => self.start + (self.end - self.start) * t,
            ScheduleKind::Geometric => self.start * (self.end / self.start).powf(t),
        }
    }
}

/// Metropolis acceptance with uphill bookkeeping for the debug log.
#[derive(Clone, Debug, Default)]
pub(crate) struct Annealer {
    /// Uphill proposals seen.
    bad_count: u64,
    /// Sum of the acceptance probabilities of uphill proposals.
    pbad_total: f64,
    accepted_uphill: u64,
}

impl Annealer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Always accept downhill; accept uphill with probability `exp(-delta / temp)`.
    /// The random source is only drawn from for uphill moves.
    pub(crate) fn should_accept<R: Rng>(&mut self, rng: &mut R, delta: f64, temp: f64) -> bool {
        if delta <= 0.0 {
            return true;
        }
        let p = if temp > 0.0 { (-delta / temp).exp() } else { 0.0 };
        self.bad_count += 1;
        self.pbad_total += p;
        if rng.gen::<f64>() < p {
            self.accepted_uphill += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn bad_count(&self) -> u64 { self.bad_count }
    pub(crate) fn pbad_total(&self) -> f64 { self.pbad_total }
    pub(crate) fn accepted_uphill(&self) -> u64 { self.accepted_uphill }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn schedules_hit_both_ends_and_decrease() {
        for kind in [ScheduleKind::Linear, ScheduleKind::Geometric] {
            let s = TemperatureSchedule { start: 10.0, end: 0.1, kind };
            assert_relative_eq!(s.at(0, 50), 10.0);
            assert_relative_eq!(s.at(49, 50), 0.1, epsilon = 1e-12);
            let temps: Vec<f64> = (0..50).map(|i| s.at(i, 50)).collect();
            assert!(temps.windows(2).all(|w| w[1] < w[0]));
        }
    }

    #[test]
    fn geometric_midpoint_is_geometric_mean() {
        let s = TemperatureSchedule { start: 100.0, end: 1.0, kind: ScheduleKind::Geometric };
        assert_relative_eq!(s.at(1, 3), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn downhill_is_always_accepted_without_drawing() {
        let mut a = Annealer::new();
        let mut rng = Pcg64Mcg::seed_from_u64(4);
        let mut twin = rng.clone();
        assert!(a.should_accept(&mut rng, -1.0, 1.0));
        assert!(a.should_accept(&mut rng, 0.0, 1.0));
        assert_eq!(rng.gen::<u64>(), twin.gen::<u64>());
        assert_eq!(a.bad_count(), 0);
    }

    #[test]
    fn uphill_acceptance_tracks_boltzmann_factor() {
        let mut a = Annealer::new();
        let mut rng = Pcg64Mcg::seed_from_u64(8);
        let n = 20_000;
        let accepted = (0..n).filter(|_| a.should_accept(&mut rng, 1.0, 1.0)).count();
        let expected = (-1.0f64).exp();
        assert!((accepted as f64 / n as f64 - expected).abs() < 0.02);
        assert_eq!(a.bad_count(), n as u64);
        assert_relative_eq!(a.pbad_total(), expected * n as f64, max_relative = 1e-9);
        assert_eq!(a.accepted_uphill(), accepted as u64);
    }
}
