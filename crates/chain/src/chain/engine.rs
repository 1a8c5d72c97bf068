//! Chain orchestrator.
//!
//! A [`Chain`] lives on the coordinator. It owns the global parameters
//! (tree, branch hyperparameters, rates, mixture), runs the fixed sweep
//! schedule and drives the workers through its [`Coordinator`]. Workers
//! only ever see parameter snapshots and tree proposals.

use crate::base::TokenReader;
use crate::chain::checkpoint::{read_header, write_header, ResumeOptions};
use crate::chain::messages::{Command, GlobalParameters, Reply};
use crate::chain::roles::{seeded_rng, Coordinator, Executor};
use crate::chain::setup::{share_tree, Setup};
use crate::chain::trace::{self, TraceRecord};
use crate::chain::{ChainConfig, TraceLikelihood};
use crate::data::{SequenceAlignment, SiteRange, TaxonSet};
use crate::errors::{ChainError, CheckpointError, Result};
use crate::process::{
    BranchProcess, EmpiricalMixture, MappingStatistics, MixtureProcess, RateProcess,
    Representation, StochasticProcess, TopologySearch,
};
use crate::tree::Tree;
use phylomix_comm::Communicator;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Inner iterations of the mapping-conditioned branch and rate moves.
const COLLAPSED_REPS: usize = 50;

/// Coordinator-side state of one MCMC chain.
pub struct Chain<C: Communicator> {
    config: ChainConfig,
    executor: Coordinator<C>,
    alignment: Arc<SequenceAlignment>,
    tree: Tree,
    branch: BranchProcess,
    rate: RateProcess,
    mixture: MixtureProcess,
    topology: TopologySearch,
    representation: Representation,
    log_likelihood: f64,
    iteration: usize,
    total_time: Duration,
    topology_time: Duration,
    rng: Xoshiro256PlusPlus,
    /// First failure that left the workers in an unknown state.
    aborted: Option<String>,
}

impl<C: Communicator> Chain<C> {
    /// Build a fresh chain on the coordinator. Collective: every worker must
    /// run [`Worker::new`](crate::chain::Worker::new) at the same time.
    ///
    /// The initial state is drawn from the prior, sent to the workers and
    /// unfolded.
    pub fn new(config: ChainConfig, comm: C) -> Result<Self> {
        if !comm.is_root() {
            return Err(ChainError::Config(format!(
                "chain must be built on rank 0, not rank {}",
                comm.rank()
            )));
        }
        config.validate()?;
        let setup = Setup::load(&config, &comm)?;
        let mut rng = seeded_rng(config.rank_seed(0));
        let tree = setup.initial_tree(&config, &comm, &mut rng)?;
        let mut chain = Self::assemble(config, comm, setup.alignment, tree, rng)?;

        if !chain.config.fixed_branch_lengths {
            chain.branch.sample(&mut chain.tree, &mut chain.rng);
        }
        chain.rate.sample(&mut chain.tree, &mut chain.rng);
        chain.mixture.sample(&mut chain.tree, &mut chain.rng);
        chain.update_parameters()?;
        chain.unfold()?;
        log::info!(
            "new chain: {} taxa, {} sites, {} ranks, log-likelihood {}",
            chain.alignment.n_taxa(),
            chain.alignment.n_site(),
            chain.executor.comm().size(),
            chain.log_likelihood
        );
        Ok(chain)
    }

    /// Rebuild a chain from a checkpoint written by [`Chain::save`].
    /// Collective: every worker must run
    /// [`Worker::resume`](crate::chain::Worker::resume) on its own copy of
    /// the stream.
    pub fn resume<R: BufRead>(reader: R, options: &ResumeOptions, comm: C) -> Result<Self> {
        let mut tokens = TokenReader::new(reader);
        let header = read_header(&mut tokens, options)?;
        log::info!("resuming chain from format version {}", header.version);
        let setup = Setup::load(&header.config, &comm)?;
        let tree = Tree::from_newick(&header.newick, setup.alignment.taxa())
            .map_err(CheckpointError::from)?;
        let tree = share_tree(&comm, Some(tree))?;
        let rng = seeded_rng(header.config.rank_seed(0));
        let mut chain = Self::assemble(header.config, comm, setup.alignment, tree, rng)?;

        chain.branch.from_stream(&mut chain.tree, &mut tokens)?;
        chain.rate.from_stream(&mut chain.tree, &mut tokens)?;
        chain.mixture.from_stream(&mut chain.tree, &mut tokens)?;
        // Files from writers that did not record the sweep count end here.
        if let Some(token) = tokens.next_token()? {
            chain.iteration = token.parse().map_err(|_| CheckpointError::Malformed {
                field: "sweep count",
                value: token,
            })?;
        }
        chain.update_parameters()?;
        chain.unfold()?;
        log::info!(
            "resumed chain at sweep {}, log-likelihood {}",
            chain.iteration,
            chain.log_likelihood
        );
        Ok(chain)
    }

    fn assemble(
        config: ChainConfig,
        comm: C,
        alignment: Arc<SequenceAlignment>,
        tree: Tree,
        rng: Xoshiro256PlusPlus,
    ) -> Result<Self> {
        let n_site = alignment.n_site();
        let n_states = alignment.n_states();
        let empirical = if config.mixture.empirical {
            Some(EmpiricalMixture::from_path(&config.mixture.mixture_type, n_states)?)
        } else {
            None
        };
        let mixture = MixtureProcess::new(
            n_site,
            n_states,
            config.components.resolve(n_site),
            config.mixture.fixed_count,
            empirical,
            config.dir_weight_prior,
        );
        Ok(Self {
            rate: RateProcess::new(config.n_rate_categories, n_site),
            topology: TopologySearch::new(config.n_spr, config.n_nni),
            branch: BranchProcess::new(),
            mixture,
            executor: Coordinator::new(comm),
            alignment,
            tree,
            config,
            representation: Representation::Collapsed,
            log_likelihood: 0.0,
            iteration: 0,
            total_time: Duration::ZERO,
            topology_time: Duration::ZERO,
            rng,
            aborted: None,
        })
    }

    /// One sweep of the fixed move schedule. Returns `1.0`.
    ///
    /// Any failure after the sweep has started aborts the chain: the ranks
    /// may then disagree on the representation and the parameters.
    pub fn step(&mut self, tuning: f64) -> Result<f64> {
        self.ensure_running()?;
        if self.representation != Representation::Unfolded {
            return Err(ChainError::Protocol("sweep started while collapsed".to_string()));
        }
        let outcome = self.sweep(tuning);
        self.abort_on(outcome)
    }

    fn sweep(&mut self, tuning: f64) -> Result<f64> {
        let sweep = Instant::now();

        if !self.config.fixed_branch_lengths {
            for t in [tuning, 0.1 * tuning] {
                self.branch.move_lengths(
                    &mut self.tree,
                    &mut self.log_likelihood,
                    t,
                    &mut self.executor,
                    &mut self.rng,
                )?;
            }
        }
        if !self.config.fixed_topology {
            self.topology.run(
                &mut self.tree,
                &mut self.log_likelihood,
                &self.branch,
                &mut self.executor,
                &mut self.rng,
            )?;
        }
        self.topology_time += sweep.elapsed();

        let stats = self.collapse_workers()?;
        if !self.config.fixed_branch_lengths {
            let total_rate = self.rate.total_rate();
            for t in [tuning, 0.1 * tuning] {
                self.branch.move_collapsed(
                    &mut self.tree,
                    t,
                    COLLAPSED_REPS,
                    &stats.branch_events,
                    total_rate,
                    &mut self.rng,
                );
            }
        }
        self.send_parameters()?;
        for t in [tuning, 0.3 * tuning, 0.03 * tuning] {
            let length = self.tree.total_length();
            self.rate
                .move_collapsed(t, COLLAPSED_REPS, &stats, length, &mut self.rng);
        }
        self.mixture.move_collapsed(1.0, 1, 5, &stats, &mut self.rng);
        self.send_parameters()?;
        self.unfold_workers()?;

        self.total_time += sweep.elapsed();
        self.iteration += 1;
        log::debug!(
            "sweep {}: log-likelihood {} length {} alpha {} components {}",
            self.iteration,
            self.log_likelihood,
            self.tree.total_length(),
            self.rate.alpha(),
            self.mixture.n_occupied()
        );
        Ok(1.0)
    }

    /// Run `n` sweeps at a fixed tuning.
    pub fn run(&mut self, n: usize, tuning: f64) -> Result<()> {
        for _ in 0..n {
            self.step(tuning)?;
        }
        Ok(())
    }

    fn parameters(&self) -> GlobalParameters {
        GlobalParameters {
            tree: self.tree.clone(),
            branch_shape: self.branch.shape(),
            branch_rate: self.branch.rate(),
            alpha: self.rate.alpha(),
            rates: self.rate.rates().to_vec(),
            categories: self.rate.categories().to_vec(),
            dir_weights: self.mixture.dir_weights().to_vec(),
            profiles: self.mixture.profiles().to_vec(),
            weights: self.mixture.weights().to_vec(),
            allocation: self.mixture.allocation().to_vec(),
        }
    }

    /// Refuse work once an earlier failure aborted the chain.
    fn ensure_running(&self) -> Result<()> {
        match &self.aborted {
            Some(cause) => Err(ChainError::Aborted(cause.clone())),
            None => Ok(()),
        }
    }

    /// Latch the first failure of a state-changing collective.
    fn abort_on<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            if self.aborted.is_none() {
                log::error!("chain aborted at sweep {}: {e}", self.iteration);
                self.aborted = Some(e.to_string());
            }
        }
        outcome
    }

    /// Read-only queries leave the workers as they were unless the
    /// transport itself failed.
    fn abort_on_transport<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if matches!(outcome, Err(ChainError::Comm(_))) {
            return self.abort_on(outcome);
        }
        outcome
    }

    /// Whether an earlier failure aborted the chain.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Send every global parameter to the workers.
    pub fn update_parameters(&mut self) -> Result<()> {
        self.ensure_running()?;
        let outcome = self.send_parameters();
        self.abort_on(outcome)
    }

    fn send_parameters(&mut self) -> Result<()> {
        let params = Box::new(self.parameters());
        self.executor.execute(&Command::UpdateParameters(params))?;
        Ok(())
    }

    /// Draw a substitution mapping on every worker and adopt the rate
    /// categories drawn with it.
    pub fn collapse(&mut self) -> Result<MappingStatistics> {
        self.ensure_running()?;
        if self.representation == Representation::Collapsed {
            return Err(ChainError::Protocol("collapse while collapsed".to_string()));
        }
        let outcome = self.collapse_workers();
        self.abort_on(outcome)
    }

    fn collapse_workers(&mut self) -> Result<MappingStatistics> {
        let stats = match self.executor.execute(&Command::Collapse)? {
            Reply::Statistics(stats) => stats,
            other => {
                return Err(ChainError::Protocol(format!(
                    "unexpected reply {other:?} to collapse"
                )))
            }
        };
        self.representation = Representation::Collapsed;
        self.rate.set_categories(&stats);
        Ok(stats)
    }

    /// Rebuild the likelihood arrays on every worker and cache the total.
    pub fn unfold(&mut self) -> Result<f64> {
        self.ensure_running()?;
        if self.representation == Representation::Unfolded {
            return Err(ChainError::Protocol("unfold while unfolded".to_string()));
        }
        let outcome = self.unfold_workers();
        self.abort_on(outcome)
    }

    fn unfold_workers(&mut self) -> Result<f64> {
        self.log_likelihood = self.executor.log_likelihood(&Command::Unfold)?;
        self.representation = Representation::Unfolded;
        Ok(self.log_likelihood)
    }

    /// Sum of the workers' cached slice log-likelihoods.
    pub fn recompute_log_likelihood(&mut self) -> Result<f64> {
        self.query(&Command::LogLikelihood)
    }

    /// Log-likelihood with mixture components and rate categories
    /// integrated out.
    pub fn full_log_likelihood(&mut self) -> Result<f64> {
        self.query(&Command::FullLogLikelihood)
    }

    /// Per-site log-likelihoods given the allocation, in site order.
    pub fn site_log_likelihoods(&mut self) -> Result<Vec<f64>> {
        self.ensure_running()?;
        let outcome = self.executor.execute(&Command::SiteLogLikelihoods);
        match self.abort_on_transport(outcome)? {
            Reply::SiteLogLikelihoods(values) => Ok(values),
            other => Err(ChainError::Protocol(format!(
                "unexpected reply {other:?} to site log-likelihoods"
            ))),
        }
    }

    /// Marginal log-likelihood of a test alignment over the same taxa.
    pub fn cross_validation(&mut self, path: &Path) -> Result<f64> {
        self.query(&Command::CrossValidation {
            path: path.to_path_buf(),
        })
    }

    fn query(&mut self, command: &Command) -> Result<f64> {
        self.ensure_running()?;
        let outcome = self.executor.log_likelihood(command);
        self.abort_on_transport(outcome)
    }

    /// Placeholder: the prior density is not computed.
    pub fn log_prior(&self) -> f64 {
        0.0
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn log_prob(&self) -> f64 {
        self.log_prior() + self.log_likelihood()
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Continue numbering from an earlier run.
    pub fn set_iteration(&mut self, iteration: usize) {
        self.iteration = iteration;
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn taxa(&self) -> &Arc<TaxonSet> {
        self.alignment.taxa()
    }

    pub fn alignment(&self) -> &SequenceAlignment {
        &self.alignment
    }

    pub fn branch_hyperparameters(&self) -> (f64, f64) {
        (self.branch.shape(), self.branch.rate())
    }

    pub fn rate_shape(&self) -> f64 {
        self.rate.alpha()
    }

    pub fn rate_categories(&self) -> &[usize] {
        self.rate.categories()
    }

    pub fn allocation(&self) -> &[usize] {
        self.mixture.allocation()
    }

    pub fn profiles(&self) -> &[Vec<f64>] {
        self.mixture.profiles()
    }

    pub fn weights(&self) -> &[f64] {
        self.mixture.weights()
    }

    pub fn dir_weights(&self) -> &[f64] {
        self.mixture.dir_weights()
    }

    pub fn n_components(&self) -> usize {
        self.mixture.n_components()
    }

    pub fn n_occupied_components(&self) -> usize {
        self.mixture.n_occupied()
    }

    pub fn stat_entropy(&self) -> f64 {
        self.mixture.stat_entropy()
    }

    pub fn mean_dir_weight(&self) -> f64 {
        self.mixture.mean_dir_weight()
    }

    /// Tree length in expected substitutions per site: the raw length
    /// scaled by the mean over sites of rate times profile heterogeneity.
    pub fn renormalized_tree_length(&self) -> f64 {
        let n_site = self.alignment.n_site();
        if n_site == 0 {
            return self.tree.total_length();
        }
        let scale: f64 = (0..n_site)
            .map(|site| self.rate.site_rate(site) * self.mixture.site_heterogeneity(site))
            .sum::<f64>()
            / n_site as f64;
        self.tree.total_length() * scale
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Sites owned by the coordinator: always empty.
    pub fn site_range(&self) -> SiteRange {
        crate::data::site_range(self.alignment.n_site(), 0, self.executor.comm().size())
    }

    pub fn trace_header<W: Write>(&self, out: &mut W) -> Result<()> {
        trace::write_header(out)?;
        Ok(())
    }

    /// Write one trace record and reset both timers.
    pub fn trace<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.ensure_running()?;
        let log_likelihood = match self.config.trace_likelihood {
            TraceLikelihood::Cached => self.log_likelihood,
            TraceLikelihood::Full => self.full_log_likelihood()?,
        };
        let (seconds, topology_percent) = if self.total_time > Duration::ZERO {
            let share = self.topology_time.as_secs_f64() / self.total_time.as_secs_f64();
            (self.total_time.as_secs_f64(), (share * 100.0) as u32)
        } else {
            (0.0, 0)
        };
        self.total_time = Duration::ZERO;
        self.topology_time = Duration::ZERO;
        TraceRecord {
            iteration: self.iteration,
            seconds,
            topology_percent,
            log_likelihood,
            length: self.renormalized_tree_length(),
            alpha: self.rate.alpha(),
            n_occupied: self.mixture.n_occupied(),
            stat_entropy: self.mixture.stat_entropy(),
            mean_dir_weight: self.mixture.mean_dir_weight(),
            allocation: self.mixture.allocation().to_vec(),
        }
        .write(out)?;
        Ok(())
    }

    /// Write a checkpoint: header, then branch, rate and mixture state,
    /// then the sweep count. An aborted chain writes nothing.
    pub fn save<W: Write>(&self, out: &mut W) -> Result<()> {
        self.ensure_running()?;
        write_header(out, &self.config, &self.tree.to_newick(self.alignment.taxa()))?;
        self.branch.to_stream(&self.tree, out)?;
        self.rate.to_stream(&self.tree, out)?;
        self.mixture.to_stream(&self.tree, out)?;
        writeln!(out, "{}", self.iteration)?;
        out.flush()?;
        log::info!("checkpoint written at sweep {}", self.iteration);
        Ok(())
    }
}

impl<C: Communicator> Drop for Chain<C> {
    fn drop(&mut self) {
        if let Err(e) = self.executor.execute(&Command::Shutdown) {
            log::debug!("shutdown not delivered: {e}");
        }
    }
}
