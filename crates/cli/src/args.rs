use crate::defaults;
use anyhow::{Context, Result};
use clap::Args;
use phylomix_chain::chain::{ChainBuilder, ChainConfig, TraceLikelihood};
use std::path::PathBuf;

/// How long and how often: shared by `run` and `resume`.
#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    /// Number of processes, coordinator included (at least 2)
    #[arg(long = "np", default_value_t = defaults::N_PROCS)]
    pub n_procs: usize,

    /// Stop once the chain has reached this many sweeps
    #[arg(short = 'x', long, default_value_t = defaults::SWEEPS)]
    pub until: usize,

    /// Write the checkpoint every N sweeps
    #[arg(long, default_value_t = defaults::SAVE_EVERY)]
    pub save_every: usize,

    /// Scale of the proposal kernels
    #[arg(long, default_value_t = defaults::TUNING)]
    pub tuning: f64,

    /// Record the likelihood integrated over components and rate categories
    /// in the trace instead of the cached one
    #[arg(long)]
    pub full_trace: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl ScheduleArgs {
    pub fn trace_likelihood(&self) -> TraceLikelihood {
        if self.full_trace {
            TraceLikelihood::Full
        } else {
            TraceLikelihood::Cached
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Chain name: outputs go to <name>.trace and <name>.param
    #[arg(default_value = defaults::CHAIN_NAME)]
    pub name: String,

    /// Alignment (FASTA or sequential PHYLIP)
    #[arg(short = 'd', long, required_unless_present = "config")]
    pub data: Option<PathBuf>,

    /// Load every chain setting from a JSON file instead of the flags below
    #[arg(long, conflicts_with = "data")]
    pub config: Option<PathBuf>,

    /// Starting tree in Newick format, or "none" for a random topology
    #[arg(short = 'T', long, default_value = "None")]
    pub tree: String,

    /// Number of discrete Gamma rate categories
    #[arg(long = "ncat", default_value_t = defaults::RATE_CATEGORIES)]
    pub rate_categories: usize,

    /// Number of profile components, -1 for one per site
    #[arg(long = "ncomp", default_value_t = defaults::COMPONENTS, allow_hyphen_values = true)]
    pub components: i64,

    /// Keep the component count fixed
    #[arg(long)]
    pub fixed_ncomp: bool,

    /// Fixed profiles and weights read from a mixture file
    #[arg(long, value_name = "FILE")]
    pub empirical: Option<String>,

    /// Rate of the exponential prior on Dirichlet weights (0: unit rate)
    #[arg(long, default_value = "0.0")]
    pub dir_weight_prior: f64,

    /// Keep the starting topology
    #[arg(long)]
    pub fixed_topo: bool,

    /// Keep the branch lengths of the starting tree
    #[arg(long)]
    pub fixed_lengths: bool,

    /// SPR proposals per sweep
    #[arg(long, default_value_t = defaults::N_SPR)]
    pub nspr: usize,

    /// NNI proposals per sweep
    #[arg(long, default_value_t = defaults::N_NNI)]
    pub nni: usize,

    /// Remove constant sites from the alignment
    #[arg(long)]
    pub dc: bool,

    /// Random seed (rank r uses seed + r)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Overwrite the outputs of an existing chain of the same name
    #[arg(short, long)]
    pub force: bool,

    #[command(flatten)]
    pub schedule: ScheduleArgs,
}

impl RunArgs {
    /// Chain configuration from the JSON file or from the flags.
    pub fn to_config(&self) -> Result<ChainConfig> {
        if let Some(path) = &self.config {
            return ChainConfig::from_json_path(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()));
        }
        let data = self.data.as_ref().context("An alignment (--data) is required")?;
        let mut builder = ChainBuilder::new()
            .data_file(data)
            .tree(&self.tree)
            .rate_categories(self.rate_categories)
            .components(self.components)
            .fixed_component_count(self.fixed_ncomp)
            .dir_weight_prior(self.dir_weight_prior)
            .fixed_topology(self.fixed_topo)
            .topology_budget(self.nspr, self.nni)
            .remove_constant_sites(self.dc)
            .fixed_branch_lengths(self.fixed_lengths)
            .trace_likelihood(self.schedule.trace_likelihood());
        if let Some(path) = &self.empirical {
            builder = builder.empirical_mixture(path.as_str());
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        builder.build().context("Invalid chain settings")
    }
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Name of the chain to continue
    pub name: String,

    /// Keep the branch lengths fixed from here on
    #[arg(long)]
    pub fixed_lengths: bool,

    /// Random seed (rank r uses seed + r)
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub schedule: ScheduleArgs,
}
