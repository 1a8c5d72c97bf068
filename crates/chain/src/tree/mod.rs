//! Unrooted trees and their rearrangements.

mod topology;
#[allow(clippy::module_inception)]
mod tree;

pub use topology::Spr;
pub use tree::{Edge, Step, Tree, DEFAULT_BRANCH_LENGTH, MIN_BRANCH_LENGTH};
