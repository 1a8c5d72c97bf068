//! Gamma prior on branch lengths with hyperpriors on its shape and rate.
//!
//! The lengths themselves live in the [`Tree`]; this process owns the
//! hyperparameters and the moves that use them.

use super::topology::TreeEvaluator;
use super::traits::StochasticProcess;
use crate::base::special::ln_gamma_density;
use crate::base::{random, TokenReader};
use crate::errors::{CheckpointError, Result};
use crate::tree::{Tree, MIN_BRANCH_LENGTH};
use rand::Rng;
use std::io::{self, BufRead, Write};

/// Rate of the exponential hyperprior on the Gamma shape.
const SHAPE_PRIOR_RATE: f64 = 1.0;
/// Rate of the exponential hyperprior on the Gamma rate.
const RATE_PRIOR_RATE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct BranchProcess {
    shape: f64,
    rate: f64,
}

impl Default for BranchProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchProcess {
    pub fn new() -> Self {
        Self {
            shape: 1.0,
            rate: 10.0,
        }
    }

    #[inline]
    pub fn shape(&self) -> f64 {
        self.shape
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Log prior density of one branch length.
    #[inline]
    pub fn log_length_prior(&self, length: f64) -> f64 {
        ln_gamma_density(length, self.shape, self.rate)
    }

    /// Log prior density of all branch lengths of `tree`.
    pub fn log_lengths_prior(&self, tree: &Tree) -> f64 {
        tree.edges()
            .iter()
            .map(|e| self.log_length_prior(e.length))
            .sum()
    }

    fn log_hyper_prior(&self) -> f64 {
        -SHAPE_PRIOR_RATE * self.shape - RATE_PRIOR_RATE * self.rate
    }

    /// Mapping-conditioned move: a Gibbs draw of every branch length given
    /// its event count `branch_events[edge]` and the summed site rates,
    /// then `n_rep` rounds of scale moves on the hyperparameters. Returns
    /// the acceptance rate of the hyperparameter moves.
    pub fn move_collapsed<R: Rng + ?Sized>(
        &mut self,
        tree: &mut Tree,
        tuning: f64,
        n_rep: usize,
        branch_events: &[u64],
        total_rate: f64,
        rng: &mut R,
    ) -> f64 {
        for (edge, &events) in branch_events.iter().enumerate().take(tree.n_edges()) {
            let length = random::gamma(rng, self.shape + events as f64, self.rate + total_rate);
            tree.set_length(edge, length.max(MIN_BRANCH_LENGTH));
        }
        self.move_hyper(tree, tuning, n_rep, rng)
    }

    /// Scale moves on shape then rate, conditional on the current lengths.
    pub fn move_hyper<R: Rng + ?Sized>(
        &mut self,
        tree: &Tree,
        tuning: f64,
        n_rep: usize,
        rng: &mut R,
    ) -> f64 {
        let mut accepted = 0;
        for _ in 0..n_rep {
            for target in [Hyper::Shape, Hyper::Rate] {
                let before = self.log_lengths_prior(tree) + self.log_hyper_prior();
                let saved = self.clone();
                let m = random::scale_factor(rng, tuning);
                match target {
                    Hyper::Shape => self.shape *= m,
                    Hyper::Rate => self.rate *= m,
                }
                let after = self.log_lengths_prior(tree) + self.log_hyper_prior();
                if random::accept(rng, after - before + m.ln()) {
                    accepted += 1;
                } else {
                    *self = saved;
                }
            }
        }
        accepted as f64 / (2 * n_rep).max(1) as f64
    }

    /// Likelihood-driven scale move on every branch length in turn.
    /// `log_likelihood` is the value of the current tree and follows
    /// accepted proposals. Returns the acceptance rate.
    pub fn move_lengths<E, R>(
        &self,
        tree: &mut Tree,
        log_likelihood: &mut f64,
        tuning: f64,
        evaluator: &mut E,
        rng: &mut R,
    ) -> Result<f64>
    where
        E: TreeEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let mut accepted = 0;
        for edge in 0..tree.n_edges() {
            let old = tree.length(edge);
            let m = random::scale_factor(rng, tuning);
            let new = old * m;
            // Outside the support: rejected without a likelihood.
            if new < MIN_BRANCH_LENGTH {
                continue;
            }
            let mut proposal = tree.clone();
            proposal.set_length(edge, new);
            let candidate = evaluator.propose(&proposal)?;
            let log_ratio = candidate - *log_likelihood + self.log_length_prior(new)
                - self.log_length_prior(old)
                + m.ln();
            let accept = random::accept(rng, log_ratio);
            evaluator.resolve(accept)?;
            if accept {
                *tree = proposal;
                *log_likelihood = candidate;
                accepted += 1;
            }
        }
        Ok(accepted as f64 / tree.n_edges().max(1) as f64)
    }
}

#[derive(Clone, Copy)]
enum Hyper {
    Shape,
    Rate,
}

impl StochasticProcess for BranchProcess {
    fn sample<R: Rng + ?Sized>(&mut self, tree: &mut Tree, rng: &mut R) {
        *self = Self::new();
        for edge in 0..tree.n_edges() {
            let length = random::gamma(rng, self.shape, self.rate);
            tree.set_length(edge, length.max(MIN_BRANCH_LENGTH));
        }
    }

    fn to_stream<W: Write>(&self, tree: &Tree, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}\t{}", self.shape, self.rate)?;
        let lengths: Vec<String> = tree.preorder_lengths().iter().map(f64::to_string).collect();
        writeln!(out, "{}", lengths.len())?;
        writeln!(out, "{}", lengths.join("\t"))
    }

    fn from_stream<R: BufRead>(
        &mut self,
        tree: &mut Tree,
        tokens: &mut TokenReader<R>,
    ) -> std::result::Result<(), CheckpointError> {
        let shape: f64 = tokens.parse("branch shape")?;
        let rate: f64 = tokens.parse("branch rate")?;
        let n_edges: usize = tokens.parse("branch count")?;
        if n_edges != tree.n_edges() {
            return Err(CheckpointError::Malformed {
                field: "branch count",
                value: n_edges.to_string(),
            });
        }
        let lengths: Vec<f64> = tokens.parse_vec(n_edges, "branch length")?;
        if let Some(bad) = lengths.iter().find(|&&l| !(l > 0.0)) {
            return Err(CheckpointError::Malformed {
                field: "branch length",
                value: bad.to_string(),
            });
        }
        tree.set_preorder_lengths(&lengths)?;
        self.shape = shape;
        self.rate = rate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::io::Cursor;

    #[test]
    fn test_gibbs_lengths_track_event_counts() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut tree = Tree::random(4, 0.1, &mut rng).unwrap();
        let mut process = BranchProcess::new();
        let events = vec![0, 0, 0, 0, 500];
        let mut busy = 0.0;
        let mut idle = 0.0;
        for _ in 0..50 {
            process.move_collapsed(&mut tree, 1.0, 5, &events, 50.0, &mut rng);
            busy += tree.length(4);
            idle += tree.length(0);
            tree.validate().unwrap();
        }
        // Posterior mean of a busy edge is near 500 / 50.
        assert!(busy / 50.0 > 3.0);
        assert!(idle / 50.0 < 0.1);
    }

    #[test]
    fn test_length_moves_alternate_with_evaluator() {
        use crate::process::topology::tests::FlatEvaluator;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let mut tree = Tree::random(5, 0.1, &mut rng).unwrap();
        let process = BranchProcess::new();
        let mut evaluator = FlatEvaluator::default();
        let mut lnl = 0.0;
        let rate = process
            .move_lengths(&mut tree, &mut lnl, 1.0, &mut evaluator, &mut rng)
            .unwrap();
        assert!((0.0..=1.0).contains(&rate));
        assert_eq!(evaluator.proposals, tree.n_edges());
        assert!(!evaluator.pending);
        tree.validate().unwrap();
    }

    #[test]
    fn test_length_moves_reject_below_the_floor() {
        use crate::process::topology::tests::FlatEvaluator;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let mut tree = Tree::random(5, 0.1, &mut rng).unwrap();
        for edge in 0..tree.n_edges() {
            tree.set_length(edge, MIN_BRANCH_LENGTH);
        }
        let process = BranchProcess::new();
        let mut evaluator = FlatEvaluator::default();
        let mut lnl = 0.0;
        let passes = 20;
        for _ in 0..passes {
            process
                .move_lengths(&mut tree, &mut lnl, 2.0, &mut evaluator, &mut rng)
                .unwrap();
            assert!(tree.edges().iter().all(|e| e.length >= MIN_BRANCH_LENGTH));
        }
        // Shrinking a branch already at the floor is never evaluated.
        assert!(evaluator.proposals < passes * tree.n_edges());
        assert!(evaluator.proposals > 0);
    }

    #[test]
    fn test_stream_round_trip() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut tree = Tree::random(6, 0.1, &mut rng).unwrap();
        let mut process = BranchProcess::new();
        process.sample(&mut tree, &mut rng);
        process.move_hyper(&tree, 1.0, 10, &mut rng);

        let mut out = Vec::new();
        process.to_stream(&tree, &mut out).unwrap();
        let mut copy = tree.clone();
        for e in 0..copy.n_edges() {
            copy.set_length(e, 1.0);
        }
        let mut back = BranchProcess::new();
        back.from_stream(&mut copy, &mut TokenReader::new(Cursor::new(out)))
            .unwrap();
        assert_eq!(back, process);
        assert_eq!(copy, tree);
    }

    #[test]
    fn test_stream_rejects_non_positive_length() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut tree = Tree::random(3, 0.1, &mut rng).unwrap();
        let mut back = BranchProcess::new();
        let text = "1 10\n3\n0.1 0 0.2\n";
        assert!(back
            .from_stream(&mut tree, &mut TokenReader::new(Cursor::new(text)))
            .is_err());
    }
}
