//! Builder pattern for chain configurations.
//!
//! Provides a fluent API with defaults and validation.

pub use crate::errors::BuilderError;
use crate::chain::{ChainConfig, ComponentCount, MixtureFlags, TraceLikelihood, TreeSource};
use std::path::PathBuf;

/// Builder for [`ChainConfig`].
///
/// # Examples
///
/// ```
/// use phylomix_chain::chain::{ChainBuilder, TraceLikelihood};
///
/// let config = ChainBuilder::new()
///     .data_file("data.fasta")
///     .tree("None")
///     .rate_categories(4)
///     .components(-1)
///     .trace_likelihood(TraceLikelihood::Cached)
///     .seed(42)
///     .build()
///     .unwrap();
/// assert_eq!(config.n_spr, 10);
/// ```
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    // Required
    data_file: Option<PathBuf>,
    trace_likelihood: Option<TraceLikelihood>,

    tree: TreeSource,
    n_rate_categories: usize,
    components: i64,
    mixture: MixtureFlags,
    dir_weight_prior: f64,
    fixed_topology: bool,
    n_spr: usize,
    n_nni: usize,
    remove_constant_sites: bool,
    fixed_branch_lengths: bool,
    seed: Option<u64>,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            data_file: None,
            trace_likelihood: None,
            tree: TreeSource::Random,
            n_rate_categories: 4,
            components: -1,
            mixture: MixtureFlags::default(),
            dir_weight_prior: 0.0,
            fixed_topology: false,
            n_spr: 10,
            n_nni: 0,
            remove_constant_sites: false,
            fixed_branch_lengths: false,
            seed: None,
        }
    }

    /// Alignment file (required).
    pub fn data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_file = Some(path.into());
        self
    }

    /// Which log-likelihood the trace reports (required).
    pub fn trace_likelihood(mut self, which: TraceLikelihood) -> Self {
        self.trace_likelihood = Some(which);
        self
    }

    /// Starting tree: a Newick path, or `None` for a random topology.
    pub fn tree(mut self, source: &str) -> Self {
        self.tree = TreeSource::parse(source);
        self
    }

    /// Number of discrete Gamma categories (default: 4).
    pub fn rate_categories(mut self, n: usize) -> Self {
        self.n_rate_categories = n;
        self
    }

    /// Mixture component count, `-1` for one per site (default: -1).
    pub fn components(mut self, n: i64) -> Self {
        self.components = n;
        self
    }

    pub fn fixed_component_count(mut self, fixed: bool) -> Self {
        self.mixture.fixed_count = fixed;
        self
    }

    /// Use the fixed profiles of an empirical mixture file.
    pub fn empirical_mixture(mut self, path: impl Into<String>) -> Self {
        self.mixture.empirical = true;
        self.mixture.mixture_type = path.into();
        self
    }

    pub fn dir_weight_prior(mut self, rate: f64) -> Self {
        self.dir_weight_prior = rate;
        self
    }

    pub fn fixed_topology(mut self, fixed: bool) -> Self {
        self.fixed_topology = fixed;
        self
    }

    /// SPR and NNI proposals per sweep (default: 10 and 0).
    pub fn topology_budget(mut self, n_spr: usize, n_nni: usize) -> Self {
        self.n_spr = n_spr;
        self.n_nni = n_nni;
        self
    }

    pub fn remove_constant_sites(mut self, remove: bool) -> Self {
        self.remove_constant_sites = remove;
        self
    }

    pub fn fixed_branch_lengths(mut self, fixed: bool) -> Self {
        self.fixed_branch_lengths = fixed;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ChainConfig, BuilderError> {
        let data_file = self
            .data_file
            .ok_or(BuilderError::MissingRequired("data_file"))?;
        let trace_likelihood = self
            .trace_likelihood
            .ok_or(BuilderError::MissingRequired("trace_likelihood"))?;
        let components = ComponentCount::try_from(self.components)?;
        if self.mixture.empirical && self.mixture.mixture_type.is_empty() {
            return Err(BuilderError::MissingRequired("empirical mixture file"));
        }

        let config = ChainConfig {
            data_file,
            tree: self.tree,
            n_rate_categories: self.n_rate_categories,
            components,
            mixture: self.mixture,
            dir_weight_prior: self.dir_weight_prior,
            fixed_topology: self.fixed_topology,
            n_spr: self.n_spr,
            n_nni: self.n_nni,
            remove_constant_sites: self.remove_constant_sites,
            fixed_branch_lengths: self.fixed_branch_lengths,
            seed: self.seed,
            trace_likelihood,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_minimal() {
        let config = ChainBuilder::new()
            .data_file("data.phy")
            .trace_likelihood(TraceLikelihood::Cached)
            .build()
            .unwrap();
        assert_eq!(config.tree, TreeSource::Random);
        assert_eq!(config.n_rate_categories, 4);
        assert_eq!(config.components, ComponentCount::PerSite);
        assert_eq!((config.n_spr, config.n_nni), (10, 0));
        assert!(!config.fixed_topology);
    }

    #[test]
    fn test_builder_missing_required() {
        let err = ChainBuilder::new()
            .trace_likelihood(TraceLikelihood::Full)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuilderError::MissingRequired("data_file")));

        let err = ChainBuilder::new().data_file("a.phy").build().unwrap_err();
        assert!(matches!(err, BuilderError::MissingRequired("trace_likelihood")));
    }

    #[test]
    fn test_builder_full() {
        let config = ChainBuilder::new()
            .data_file("data.phy")
            .tree("start.tre")
            .rate_categories(8)
            .components(5)
            .fixed_component_count(true)
            .dir_weight_prior(2.0)
            .fixed_topology(true)
            .topology_budget(3, 2)
            .remove_constant_sites(true)
            .fixed_branch_lengths(true)
            .seed(9)
            .trace_likelihood(TraceLikelihood::Full)
            .build()
            .unwrap();
        assert_eq!(config.tree, TreeSource::File(PathBuf::from("start.tre")));
        assert_eq!(config.components, ComponentCount::Fixed(5));
        assert!(config.mixture.fixed_count);
        assert_eq!((config.n_spr, config.n_nni), (3, 2));
        assert_eq!(config.seed, Some(9));
    }

    #[test]
    fn test_builder_invalid_values() {
        let base = ChainBuilder::new()
            .data_file("data.phy")
            .trace_likelihood(TraceLikelihood::Cached);
        assert!(base.clone().components(0).build().is_err());
        assert!(base.clone().rate_categories(0).build().is_err());
        assert!(base.clone().dir_weight_prior(-1.0).build().is_err());
        assert!(base.empirical_mixture("").build().is_err());
    }
}
