//! Metropolis-Hastings topology search.

use super::branch::BranchProcess;
use crate::base::random;
use crate::errors::{ChainError, Result};
use crate::tree::{Spr, Tree};
use rand::Rng;

/// Scores tree proposals against the likelihood.
///
/// A proposal stays pending until [`TreeEvaluator::resolve`] keeps or
/// drops it; at most one proposal is pending at a time.
pub trait TreeEvaluator {
    /// Log-likelihood of `tree`.
    fn propose(&mut self, tree: &Tree) -> Result<f64>;

    fn resolve(&mut self, accept: bool) -> Result<()>;
}

/// Accepted / attempted proposal counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveCounts {
    pub accepted: usize,
    pub tried: usize,
}

impl MoveCounts {
    pub fn rate(&self) -> f64 {
        self.accepted as f64 / self.tried.max(1) as f64
    }

    fn record(&mut self, accepted: bool) {
        self.tried += 1;
        self.accepted += usize::from(accepted);
    }
}

/// SPR then NNI proposals with fixed per-call budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologySearch {
    pub n_spr: usize,
    pub n_nni: usize,
}

impl TopologySearch {
    pub fn new(n_spr: usize, n_nni: usize) -> Self {
        Self { n_spr, n_nni }
    }

    /// Run the budgets against `evaluator`. `log_likelihood` is the value
    /// of the current tree and follows accepted proposals.
    pub fn run<E, R>(
        &self,
        tree: &mut Tree,
        log_likelihood: &mut f64,
        branch: &BranchProcess,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<(MoveCounts, MoveCounts)>
    where
        E: TreeEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let mut spr = MoveCounts::default();
        for _ in 0..self.n_spr {
            spr.record(self.spr_step(tree, log_likelihood, branch, evaluator, rng)?);
        }
        let mut nni = MoveCounts::default();
        for _ in 0..self.n_nni {
            nni.record(self.nni_step(tree, log_likelihood, evaluator, rng)?);
        }
        log::debug!(
            "topology search: spr {}/{} nni {}/{}",
            spr.accepted,
            spr.tried,
            nni.accepted,
            nni.tried
        );
        Ok((spr, nni))
    }

    fn spr_step<E, R>(
        &self,
        tree: &mut Tree,
        log_likelihood: &mut f64,
        branch: &BranchProcess,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<bool>
    where
        E: TreeEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let candidates = tree.prune_candidates();
        if candidates.is_empty() {
            return Ok(false);
        }
        let (pruned, attach) = candidates[rng.random_range(0..candidates.len())];
        let regrafts = tree.regraft_candidates(pruned, attach);
        if regrafts.is_empty() {
            return Ok(false);
        }
        let mv = Spr {
            pruned,
            attach,
            regraft: regrafts[rng.random_range(0..regrafts.len())],
            fraction: rng.random::<f64>().clamp(1e-9, 1.0 - 1e-9),
        };
        let mut proposal = tree.clone();
        let log_jacobian = proposal.spr(mv).map_err(ChainError::Data)?;
        let log_prior_ratio = branch.log_lengths_prior(&proposal) - branch.log_lengths_prior(tree);
        self.decide(tree, proposal, log_likelihood, log_prior_ratio + log_jacobian, evaluator, rng)
    }

    fn nni_step<E, R>(
        &self,
        tree: &mut Tree,
        log_likelihood: &mut f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<bool>
    where
        E: TreeEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let internal = tree.internal_edges();
        if internal.is_empty() {
            return Ok(false);
        }
        let edge = internal[rng.random_range(0..internal.len())];
        let mut proposal = tree.clone();
        proposal.nni(edge, rng.random_range(0..2)).map_err(ChainError::Data)?;
        self.decide(tree, proposal, log_likelihood, 0.0, evaluator, rng)
    }

    fn decide<E, R>(
        &self,
        tree: &mut Tree,
        proposal: Tree,
        log_likelihood: &mut f64,
        log_hastings: f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<bool>
    where
        E: TreeEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let candidate = evaluator.propose(&proposal)?;
        let accept = random::accept(rng, candidate - *log_likelihood + log_hastings);
        evaluator.resolve(accept)?;
        if accept {
            *tree = proposal;
            *log_likelihood = candidate;
        }
        Ok(accept)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    /// Flat likelihood that checks the propose/resolve alternation.
    #[derive(Default)]
    pub(crate) struct FlatEvaluator {
        pub pending: bool,
        pub proposals: usize,
    }

    impl TreeEvaluator for FlatEvaluator {
        fn propose(&mut self, tree: &Tree) -> Result<f64> {
            assert!(!self.pending);
            tree.validate().map_err(ChainError::Data)?;
            self.pending = true;
            self.proposals += 1;
            Ok(0.0)
        }

        fn resolve(&mut self, _accept: bool) -> Result<()> {
            assert!(self.pending);
            self.pending = false;
            Ok(())
        }
    }

    #[test]
    fn test_search_spends_budgets_and_keeps_tree_valid() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut tree = Tree::random(10, 0.1, &mut rng).unwrap();
        let branch = BranchProcess::new();
        let mut evaluator = FlatEvaluator::default();
        let search = TopologySearch::new(10, 5);
        let original = tree.splits();
        let mut lnl = 0.0;
        let mut moved = false;
        for _ in 0..5 {
            let (spr, nni) = search
                .run(&mut tree, &mut lnl, &branch, &mut evaluator, &mut rng)
                .unwrap();
            assert_eq!(spr.tried, 10);
            assert_eq!(nni.tried, 5);
            // A flat likelihood accepts every NNI.
            assert_eq!(nni.accepted, 5);
            tree.validate().unwrap();
            moved |= tree.splits() != original;
        }
        assert_eq!(evaluator.proposals, 75);
        assert!(moved);
    }

    #[test]
    fn test_empty_budget_does_nothing() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut tree = Tree::random(6, 0.1, &mut rng).unwrap();
        let before = tree.clone();
        let mut evaluator = FlatEvaluator::default();
        TopologySearch::new(0, 0)
            .run(&mut tree, &mut 0.0, &BranchProcess::new(), &mut evaluator, &mut rng)
            .unwrap();
        assert_eq!(tree, before);
        assert_eq!(evaluator.proposals, 0);
    }
}
