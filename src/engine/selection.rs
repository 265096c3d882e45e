// -----------------------------------------------------------------------------
// Candidate selection across the jobs of a window
// -----------------------------------------------------------------------------

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Lowest costs first.
    #[default]
    BestWins,
    /// Highest costs among the candidates that still beat the baseline.
    WorstWins,
    /// Alternate best and worst.
    ExtremeWins,
}

impl SelectionStrategy {
    pub fn label(self) -> &'static str {
        match self {
            SelectionStrategy::BestWins => "best-wins",
            SelectionStrategy::WorstWins => "worst-wins",
            SelectionStrategy::ExtremeWins => "extreme-wins",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn by_cost_then_job(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

/// Rank the jobs of a window and return up to `keep` retained job indices,
/// the first of which is committed.
///
/// `costs[j]` is `None` for a job that did not converge; it ranks as +inf and is
/// never retained. Only candidates whose cost does not exceed `baseline` are
/// eligible, so an empty result means the baseline itself should be committed.
pub fn select(strategy: SelectionStrategy, costs: &[Option<f64>], baseline: f64, keep: usize) -> Vec<usize> {
    let mut eligible: Vec<(usize, f64)> = costs
        .iter()
        .enumerate()
        .filter_map(|(j, c)| c.filter(|c| c.is_finite() && *c <= baseline).map(|c| (j, c)))
        .collect();
    eligible.sort_by(by_cost_then_job);

    let order: Vec<usize> = match strategy {
        SelectionStrategy::BestWins => eligible.iter().map(|e| e.0).collect(),
        SelectionStrategy::WorstWins => {
            let mut desc = eligible.clone();
            desc.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            desc.iter().map(|e| e.0).collect()
        }
        SelectionStrategy::ExtremeWins => {
            let mut out = Vec::with_capacity(eligible.len());
            let (mut lo, mut hi) = (0usize, eligible.len());
            while lo < hi {
                out.push(eligible[lo].0);
                lo += 1;
                if lo < hi {
                    hi -= 1;
                    out.push(eligible[hi].0);
                }
            }
            out
        }
    };
    order.into_iter().take(keep).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COSTS: [Option<f64>; 6] = [Some(5.0), Some(2.0), None, Some(9.0), Some(2.0), Some(7.0)];

    #[test]
    fn best_wins_ranks_ascending_with_job_tiebreak() {
        assert_eq!(select(SelectionStrategy::BestWins, &COSTS, 8.0, 3), vec![1, 4, 0]);
        assert_eq!(select(SelectionStrategy::BestWins, &COSTS, 8.0, 1), vec![1]);
    }

    #[test]
    fn worst_wins_only_considers_improvements() {
        // job 3 (9.0) is above the baseline and never eligible
        assert_eq!(select(SelectionStrategy::WorstWins, &COSTS, 8.0, 2), vec![5, 0]);
    }

    #[test]
    fn extreme_wins_alternates() {
        assert_eq!(select(SelectionStrategy::ExtremeWins, &COSTS, 10.0, 5), vec![1, 3, 4, 5, 0]);
        assert_eq!(select(SelectionStrategy::ExtremeWins, &COSTS, 10.0, 1), vec![1]);
    }

    #[test]
    fn nothing_eligible_means_baseline() {
        assert!(select(SelectionStrategy::BestWins, &COSTS, 1.0, 3).is_empty());
        assert!(select(SelectionStrategy::BestWins, &[None, None], 1.0, 1).is_empty());
    }

    #[test]
    fn equal_to_baseline_is_eligible() {
        assert_eq!(select(SelectionStrategy::WorstWins, &[Some(3.0)], 3.0, 1), vec![0]);
    }

    #[test]
    fn cli_names_match_labels() {
        use clap::ValueEnum;
        for strategy in SelectionStrategy::value_variants() {
            assert_eq!(SelectionStrategy::from_str(strategy.label(), false), Ok(*strategy));
        }
        assert!(SelectionStrategy::from_str("median", false).is_err());
        assert_eq!(SelectionStrategy::ExtremeWins.to_string(), "extreme-wins");
    }
}
