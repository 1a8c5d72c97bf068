//! The sub-processes a chain is composed of.

pub mod branch;
pub mod profile;
pub mod rate;
pub mod substitution;
pub mod topology;
pub mod traits;

pub use branch::BranchProcess;
pub use profile::{EmpiricalMixture, MixtureProcess};
pub use rate::RateProcess;
pub use substitution::{
    marginal_log_likelihood, MappingStatistics, ModelView, Representation, SiteStatistics,
    SubstitutionProcess,
};
pub use topology::{MoveCounts, TopologySearch, TreeEvaluator};
pub use traits::StochasticProcess;
