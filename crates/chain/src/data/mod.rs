//! Input data: taxa, alignments and the split of sites across ranks.

pub mod alignment;
pub mod partition;

pub use alignment::{SequenceAlignment, TaxonSet};
pub use partition::{site_range, SiteRange};
