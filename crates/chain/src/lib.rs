//! # Chain Crate
//!
//! The `chain` crate implements a Bayesian phylogenetic MCMC sampler for the
//! CAT-Poisson finite mixture with discrete Gamma rates across sites. It
//! includes modules for reading alignments and trees, the sub-processes a
//! chain is composed of (substitution, rates, profile mixture, branch
//! lengths, topology search), and the orchestrator that runs the sweep
//! schedule over a pool of one coordinator and several workers.

pub mod base;
pub mod chain;
pub mod data;
pub mod errors;
pub mod prelude;
pub mod process;
pub mod tree;

pub use chain::{Chain, ChainBuilder, ChainConfig, LocalPool};
pub use data::{SequenceAlignment, TaxonSet};
pub use tree::Tree;
