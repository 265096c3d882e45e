// -----------------------------------------------------------------------------
// Run statistics, observable while the driver runs
// -----------------------------------------------------------------------------

use super::MoveKind;

/// Counters of one annealing job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobStats {
    pub proposals: u64,
    pub accepts: u64,
    pub uphill_attempts: u64,
    pub uphill_accepts: u64,
    /// Proposals rejected for invalid geometry before scoring.
    pub dropped: u64,
    /// Iterations with no active cell to perturb.
    pub idle: u64,
    pub splits: u64,
    pub merges: u64,
}

impl JobStats {
    pub(crate) fn record(&mut self, kind: MoveKind, accepted: bool) {
        self.proposals += 1;
        if accepted {
            self.accepts += 1;
            match kind {
                MoveKind::Split => self.splits += 1,
                MoveKind::Merge => self.merges += 1,
                MoveKind::Pose => {}
            }
        }
    }

    pub(crate) fn absorb(&mut self, other: &JobStats) {
        self.proposals += other.proposals;
        self.accepts += other.accepts;
        self.uphill_attempts += other.uphill_attempts;
        self.uphill_accepts += other.uphill_accepts;
        self.dropped += other.dropped;
        self.idle += other.idle;
        self.splits += other.splits;
        self.merges += other.merges;
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunStats {
    pub windows_optimized: u64,
    pub jobs_run: u64,
    pub jobs_aborted: u64,
    /// Windows where no candidate beat the baseline.
    pub baseline_fallbacks: u64,

    pub committed_frames: usize,
    pub last_committed_frame: Option<usize>,

    pub totals: JobStats,

    pub start_temp: Option<f64>,
    pub end_temp: Option<f64>,

    /// Committed window costs, most recent last.
    pub cost_history: Vec<f64>,
}

impl RunStats {
    pub fn push_cost_history(&mut self, v: f64) {
        const MAX: usize = 512;
        self.cost_history.push(v);
        if self.cost_history.len() > MAX {
            let extra = self.cost_history.len() - MAX;
            self.cost_history.drain(0..extra);
        }
    }

    pub fn acceptance_percent(&self) -> f64 {
        if self.totals.proposals == 0 {
            return 0.0;
        }
        100.0 * self.totals.accepts as f64 / self.totals.proposals as f64
    }
}
