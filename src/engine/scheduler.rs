// -----------------------------------------------------------------------------
// Move scheduler:
// - Split / merge at their configured low probabilities
// - Everything else is a pose move
// -----------------------------------------------------------------------------
use rand::prelude::*;

use super::MoveKind;

/// Samples which kind of move to propose next and keeps per-kind tallies.
#[derive(Clone, Debug)]
pub(crate) struct MoveScheduler {
    split_probability: f64,
    merge_probability: f64,
    proposals: [u64; MoveKind::COUNT],
    accepts: [u64; MoveKind::COUNT],
}

impl MoveScheduler {
    pub(crate) fn new(split_probability: f64, merge_probability: f64) -> Self {
        Self {
            split_probability,
            merge_probability,
            proposals: [0; MoveKind::COUNT],
            accepts: [0; MoveKind::COUNT],
        }
    }

    pub(crate) fn sample_kind<R: Rng>(&self, rng: &mut R) -> MoveKind {
        let r = rng.gen::<f64>();
        if r < self.split_probability {
            MoveKind::Split
        } else if r < self.split_probability + self.merge_probability {
            MoveKind::Merge
        } else {
            MoveKind::Pose
        }
    }

    pub(crate) fn record_outcome(&mut self, kind: MoveKind, accepted: bool) {
        let i = kind.index();
        self.proposals[i] = self.proposals[i].saturating_add(1);
        if accepted {
            self.accepts[i] = self.accepts[i].saturating_add(1);
        }
    }

    pub(crate) fn proposals(&self, kind: MoveKind) -> u64 {
        self.proposals[kind.index()]
    }

    pub(crate) fn accepts(&self, kind: MoveKind) -> u64 {
        self.accepts[kind.index()]
    }

    /// Accepted fraction per kind, 0 for kinds never proposed.
    pub(crate) fn acceptance_rates(&self) -> [f64; MoveKind::COUNT] {
        let mut rates = [0.0; MoveKind::COUNT];
        for (i, r) in rates.iter_mut().enumerate() {
            if self.proposals[i] > 0 {
                *r = self.accepts[i] as f64 / self.proposals[i] as f64;
            }
        }
        rates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn zero_probabilities_only_pose() {
        let sched = MoveScheduler::new(0.0, 0.0);
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        assert!((0..500).all(|_| sched.sample_kind(&mut rng) == MoveKind::Pose));
    }

    #[test]
    fn frequencies_follow_probabilities() {
        let sched = MoveScheduler::new(0.2, 0.1);
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let mut counts = [0usize; MoveKind::COUNT];
        for _ in 0..20_000 {
            counts[sched.sample_kind(&mut rng).index()] += 1;
        }
        assert!((3_600..4_400).contains(&counts[MoveKind::Split.index()]));
        assert!((1_600..2_400).contains(&counts[MoveKind::Merge.index()]));
    }

    #[test]
    fn outcomes_are_tallied_per_kind() {
        let mut sched = MoveScheduler::new(0.0, 0.0);
        sched.record_outcome(MoveKind::Pose, true);
        sched.record_outcome(MoveKind::Pose, false);
        sched.record_outcome(MoveKind::Split, true);
        assert_eq!(sched.proposals(MoveKind::Pose), 2);
        assert_eq!(sched.accepts(MoveKind::Split), 1);
        assert_eq!(sched.acceptance_rates(), [0.5, 1.0, 0.0]);
    }
}
