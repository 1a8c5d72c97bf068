//! Coordinator and worker roles.
//!
//! Both roles implement [`Executor`]. The coordinator broadcasts each
//! command and folds the gathered replies into one; a worker runs the
//! command against its own slice of sites. Roles are chosen once per
//! process by [`Role::start`] or [`Role::resume`] and never change.

use crate::base::TokenReader;
use crate::chain::checkpoint::{read_header, ResumeOptions};
use crate::chain::messages::{Command, GlobalParameters, Reply};
use crate::chain::setup::{share_tree, Setup};
use crate::chain::{Chain, ChainConfig};
use crate::data::{site_range, SequenceAlignment};
use crate::errors::{ChainError, DataError, Result};
use crate::process::{marginal_log_likelihood, MappingStatistics, SubstitutionProcess, TreeEvaluator};
use crate::tree::Tree;
use phylomix_comm::{broadcast, gather, Communicator, LocalCluster, LocalComm};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread::{self, JoinHandle};

/// Runs commands of the chain protocol.
pub trait Executor {
    fn execute(&mut self, command: &Command) -> Result<Reply>;
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> Xoshiro256PlusPlus {
    match seed {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_seed(rand::rng().random()),
    }
}

fn unexpected(command: &Command, reply: &Reply) -> ChainError {
    ChainError::Protocol(format!(
        "unexpected reply {reply:?} to {}",
        command.name()
    ))
}

/// Rank 0 side of the protocol.
pub struct Coordinator<C: Communicator> {
    comm: C,
}

impl<C: Communicator> Coordinator<C> {
    pub fn new(comm: C) -> Self {
        Self { comm }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Execute a command whose combined reply is a log-likelihood.
    pub fn log_likelihood(&mut self, command: &Command) -> Result<f64> {
        match self.execute(command)? {
            Reply::LogLikelihood(lnl) => Ok(lnl),
            other => Err(unexpected(command, &other)),
        }
    }

    fn combine(command: &Command, replies: Vec<Reply>) -> Result<Reply> {
        if let Some((i, message)) = replies.iter().enumerate().find_map(|(i, r)| match r {
            Reply::Failed(message) => Some((i, message)),
            _ => None,
        }) {
            log::warn!("worker {} failed on {}: {message}", i + 1, command.name());
            return Err(ChainError::Worker {
                rank: i + 1,
                message: message.clone(),
            });
        }
        match command {
            Command::UpdateParameters(_) | Command::Resolve { .. } | Command::Shutdown => {
                Ok(Reply::Ack)
            }
            Command::ProposeTree(_)
            | Command::Unfold
            | Command::LogLikelihood
            | Command::FullLogLikelihood
            | Command::CrossValidation { .. } => {
                let mut total = 0.0;
                for reply in &replies {
                    match reply {
                        Reply::LogLikelihood(lnl) => total += lnl,
                        other => return Err(unexpected(command, other)),
                    }
                }
                Ok(Reply::LogLikelihood(total))
            }
            Command::Collapse => {
                let mut parts = Vec::with_capacity(replies.len());
                for reply in replies {
                    match reply {
                        Reply::Statistics(stats) => parts.push(stats),
                        other => return Err(unexpected(command, &other)),
                    }
                }
                Ok(Reply::Statistics(MappingStatistics::merge(parts)))
            }
            Command::SiteLogLikelihoods => {
                let mut all = Vec::new();
                for reply in replies {
                    match reply {
                        Reply::SiteLogLikelihoods(values) => all.extend(values),
                        other => return Err(unexpected(command, &other)),
                    }
                }
                Ok(Reply::SiteLogLikelihoods(all))
            }
        }
    }
}

impl<C: Communicator> Executor for Coordinator<C> {
    fn execute(&mut self, command: &Command) -> Result<Reply> {
        log::trace!("broadcast {}", command.name());
        broadcast(&self.comm, Some(command))?;
        if let Command::Shutdown = command {
            return Ok(Reply::Ack);
        }
        let mut replies = gather(&self.comm, &Reply::Ack)?
            .ok_or_else(|| ChainError::Protocol("gather returned nothing on rank 0".to_string()))?;
        // The first entry is the coordinator's own placeholder.
        replies.remove(0);
        Self::combine(command, replies)
    }
}

impl<C: Communicator> TreeEvaluator for Coordinator<C> {
    fn propose(&mut self, tree: &Tree) -> Result<f64> {
        self.log_likelihood(&Command::ProposeTree(Box::new(tree.clone())))
    }

    fn resolve(&mut self, accept: bool) -> Result<()> {
        self.execute(&Command::Resolve { accept }).map(|_| ())
    }
}

/// Rank `>= 1` side of the protocol: owns one slice of sites.
pub struct Worker<C: Communicator> {
    comm: C,
    substitution: SubstitutionProcess,
    params: Option<GlobalParameters>,
    pending_tree: Option<Tree>,
    rng: Xoshiro256PlusPlus,
}

impl<C: Communicator> Worker<C> {
    /// Collective counterpart of [`Chain::new`].
    pub fn new(config: &ChainConfig, comm: C) -> Result<Self> {
        let setup = Setup::load(config, &comm)?;
        let mut rng = seeded_rng(config.rank_seed(comm.rank()));
        // Collective when the tree is random; the worker keeps only the
        // copies broadcast with the parameters.
        setup.initial_tree(config, &comm, &mut rng)?;
        Ok(Self::with_setup(setup, comm, rng))
    }

    /// Collective counterpart of [`Chain::resume`].
    pub fn resume<R: BufRead>(reader: R, options: &ResumeOptions, comm: C) -> Result<Self> {
        let header = read_header(&mut TokenReader::new(reader), options)?;
        let setup = Setup::load(&header.config, &comm)?;
        share_tree(&comm, None)?;
        let rng = seeded_rng(header.config.rank_seed(comm.rank()));
        Ok(Self::with_setup(setup, comm, rng))
    }

    fn with_setup(setup: Setup, comm: C, rng: Xoshiro256PlusPlus) -> Self {
        log::debug!(
            "worker {} owns sites {}..{}",
            comm.rank(),
            setup.range.min,
            setup.range.max
        );
        Self {
            substitution: SubstitutionProcess::new(setup.alignment, setup.range),
            comm,
            params: None,
            pending_tree: None,
            rng,
        }
    }

    /// Answer commands until `Shutdown`. Command failures are reported to
    /// the coordinator; transport failures end the loop with an error.
    pub fn serve(mut self) -> Result<()> {
        loop {
            let command: Command = broadcast(&self.comm, None)?;
            if let Command::Shutdown = command {
                log::debug!("worker {} shutting down", self.comm.rank());
                return Ok(());
            }
            let reply = self.execute(&command).unwrap_or_else(|e| {
                log::warn!("worker {}: {} failed: {e}", self.comm.rank(), command.name());
                Reply::Failed(e.to_string())
            });
            gather(&self.comm, &reply)?;
        }
    }

    fn cross_validation(&self, path: &Path) -> Result<f64> {
        let params = self.params.as_ref().ok_or_else(no_parameters)?;
        let taxa = self.substitution.alignment().taxa();
        let test = SequenceAlignment::from_path(path)?.aligned_to(taxa)?;
        let range = site_range(test.n_site(), self.comm.rank(), self.comm.size());
        Ok(marginal_log_likelihood(&test, range, &params.view()))
    }
}

fn no_parameters() -> ChainError {
    ChainError::Protocol("command before the first parameter update".to_string())
}

impl<C: Communicator> Executor for Worker<C> {
    fn execute(&mut self, command: &Command) -> Result<Reply> {
        if let Command::UpdateParameters(params) = command {
            self.params = Some(params.as_ref().clone());
            return Ok(Reply::Ack);
        }
        if let Command::CrossValidation { path } = command {
            return self.cross_validation(path).map(Reply::LogLikelihood);
        }
        let params = self.params.as_mut().ok_or_else(no_parameters)?;
        match command {
            Command::ProposeTree(tree) => {
                let lnl = self.substitution.propose(&params.view_with(tree))?;
                self.pending_tree = Some(tree.as_ref().clone());
                Ok(Reply::LogLikelihood(lnl))
            }
            Command::Resolve { accept } => {
                self.substitution.resolve(*accept)?;
                let pending = self.pending_tree.take();
                if let (true, Some(tree)) = (*accept, pending) {
                    params.tree = tree;
                }
                Ok(Reply::Ack)
            }
            Command::Collapse => self
                .substitution
                .collapse(&params.view(), &mut self.rng)
                .map(Reply::Statistics),
            Command::Unfold => self.substitution.unfold(&params.view()).map(Reply::LogLikelihood),
            Command::LogLikelihood => self
                .substitution
                .log_likelihood()
                .map(Reply::LogLikelihood)
                .ok_or_else(|| ChainError::Protocol("log-likelihood while collapsed".to_string())),
            Command::FullLogLikelihood => Ok(Reply::LogLikelihood(
                self.substitution.full_log_likelihood(&params.view()),
            )),
            Command::SiteLogLikelihoods => Ok(Reply::SiteLogLikelihoods(
                self.substitution.site_log_likelihoods(&params.view()),
            )),
            // Handled above, or by the service loop.
            Command::UpdateParameters(_) | Command::CrossValidation { .. } | Command::Shutdown => {
                Ok(Reply::Ack)
            }
        }
    }
}

/// The role a process plays for the lifetime of its chain.
pub enum Role<C: Communicator> {
    Coordinator(Box<Chain<C>>),
    Worker(Worker<C>),
}

impl<C: Communicator> Role<C> {
    /// Collective construction of a fresh chain: rank 0 becomes the
    /// coordinator, every other rank a worker.
    pub fn start(config: &ChainConfig, comm: C) -> Result<Self> {
        if comm.is_root() {
            Ok(Self::Coordinator(Box::new(Chain::new(config.clone(), comm)?)))
        } else {
            Ok(Self::Worker(Worker::new(config, comm)?))
        }
    }

    /// Collective construction from a checkpoint; every rank reads its own
    /// copy of the stream.
    pub fn resume<R: BufRead>(reader: R, options: &ResumeOptions, comm: C) -> Result<Self> {
        if comm.is_root() {
            Ok(Self::Coordinator(Box::new(Chain::resume(reader, options, comm)?)))
        } else {
            Ok(Self::Worker(Worker::resume(reader, options, comm)?))
        }
    }

    pub fn into_chain(self) -> Result<Chain<C>> {
        match self {
            Self::Coordinator(chain) => Ok(*chain),
            Self::Worker(_) => Err(ChainError::Protocol("worker has no chain".to_string())),
        }
    }

    pub fn into_worker(self) -> Result<Worker<C>> {
        match self {
            Self::Worker(worker) => Ok(worker),
            Self::Coordinator(_) => Err(ChainError::Protocol("coordinator is not a worker".to_string())),
        }
    }
}

/// A chain whose workers are threads of the current process.
///
/// Dropping the pool shuts the workers down without waiting for them;
/// [`LocalPool::finish`] also joins them and reports their errors.
pub struct LocalPool {
    chain: Chain<LocalComm>,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl LocalPool {
    /// Start a fresh chain over `n_procs` ranks, coordinator included.
    pub fn start(config: &ChainConfig, n_procs: usize) -> Result<Self> {
        config.validate()?;
        let config = config.clone();
        Self::spawn(n_procs, move |comm| Role::start(&config, comm))
    }

    /// Resume a chain from a checkpoint file over `n_procs` ranks. Every
    /// rank opens the file on its own.
    pub fn resume(path: &Path, options: &ResumeOptions, n_procs: usize) -> Result<Self> {
        let path = path.to_path_buf();
        let options = *options;
        Self::spawn(n_procs, move |comm| {
            let file = File::open(&path).map_err(|e| DataError::io(&path, e))?;
            Role::resume(BufReader::new(file), &options, comm)
        })
    }

    fn spawn<F>(n_procs: usize, start: F) -> Result<Self>
    where
        F: Fn(LocalComm) -> Result<Role<LocalComm>> + Clone + Send + 'static,
    {
        let mut comms = LocalCluster::new(n_procs)?;
        let root = comms.remove(0);
        let workers: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let start = start.clone();
                thread::spawn(move || start(comm)?.into_worker()?.serve())
            })
            .collect();
        match start(root).and_then(Role::into_chain) {
            Ok(chain) => Ok(Self { chain, workers }),
            Err(e) => {
                // Workers fail with a disconnected coordinator; only the
                // root cause is reported.
                let _ = join_all(workers);
                Err(e)
            }
        }
    }

    pub fn chain(&self) -> &Chain<LocalComm> {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut Chain<LocalComm> {
        &mut self.chain
    }

    /// Shut the workers down and report the first worker error.
    pub fn finish(self) -> Result<()> {
        let Self { chain, workers } = self;
        drop(chain);
        join_all(workers)
    }
}

fn join_all(workers: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    let mut first = Ok(());
    for (i, handle) in workers.into_iter().enumerate() {
        let outcome = handle.join().unwrap_or_else(|_| {
            Err(ChainError::Worker {
                rank: i + 1,
                message: "thread panicked".to_string(),
            })
        });
        if first.is_ok() {
            first = outcome;
        }
    }
    first
}
