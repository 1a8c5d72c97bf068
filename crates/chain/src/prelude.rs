//! Commonly used imports for convenience.
//!
//! # Example
//!
//! ```no_run
//! use phylomix_chain::prelude::*;
//!
//! let config = ChainBuilder::new()
//!     .data_file("data.fasta")
//!     .trace_likelihood(TraceLikelihood::Cached)
//!     .build()
//!     .unwrap();
//! let mut pool = LocalPool::start(&config, 4).unwrap();
//! pool.chain_mut().step(1.0).unwrap();
//! pool.finish().unwrap();
//! ```

pub use crate::chain::{
    Chain, ChainBuilder, ChainConfig, ComponentCount, LocalPool, ResumeOptions, TraceLikelihood,
    TreeSource,
};
pub use crate::data::{SequenceAlignment, SiteRange, TaxonSet};
pub use crate::errors::{ChainError, Result};
pub use crate::process::{MappingStatistics, Representation};
pub use crate::tree::Tree;
