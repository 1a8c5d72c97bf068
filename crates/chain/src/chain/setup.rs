//! Structural setup shared by every rank: data, taxa, tree and site range.

use crate::chain::{ChainConfig, TreeSource};
use crate::data::{site_range, SequenceAlignment, SiteRange};
use crate::errors::{DataError, Result};
use crate::tree::{Tree, DEFAULT_BRANCH_LENGTH};
use phylomix_comm::{broadcast, Communicator};
use rand::Rng;
use std::fs;
use std::sync::Arc;

pub(crate) struct Setup {
    pub alignment: Arc<SequenceAlignment>,
    pub range: SiteRange,
}

impl Setup {
    /// Load the alignment named by `config` and compute this rank's sites.
    pub fn load<C: Communicator + ?Sized>(config: &ChainConfig, comm: &C) -> Result<Self> {
        let mut alignment = SequenceAlignment::from_path(&config.data_file)?;
        if config.remove_constant_sites {
            let removed = alignment.remove_constant_sites();
            log::debug!("rank {}: removed {removed} constant sites", comm.rank());
        }
        if alignment.n_taxa() < 3 {
            return Err(DataError::Alignment(format!(
                "at least 3 taxa are needed, got {}",
                alignment.n_taxa()
            ))
            .into());
        }
        let range = site_range(alignment.n_site(), comm.rank(), comm.size());
        Ok(Self {
            alignment: Arc::new(alignment),
            range,
        })
    }

    /// Starting tree of a fresh chain. A random topology is drawn on the
    /// coordinator and broadcast; a Newick file is read by every rank.
    pub fn initial_tree<C, R>(&self, config: &ChainConfig, comm: &C, rng: &mut R) -> Result<Tree>
    where
        C: Communicator + ?Sized,
        R: Rng + ?Sized,
    {
        match &config.tree {
            TreeSource::Random => {
                let local = if comm.is_root() {
                    Some(Tree::random(self.alignment.n_taxa(), DEFAULT_BRANCH_LENGTH, rng)?)
                } else {
                    None
                };
                share_tree(comm, local)
            }
            TreeSource::File(path) => {
                let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
                Ok(Tree::from_newick(&text, self.alignment.taxa())?)
            }
        }
    }
}

/// Broadcast the coordinator's tree; workers pass `None`.
pub(crate) fn share_tree<C: Communicator + ?Sized>(comm: &C, local: Option<Tree>) -> Result<Tree> {
    let tree: Tree = broadcast(comm, local.as_ref())?;
    tree.validate()?;
    log::debug!("rank {}: received tree with {} edges", comm.rank(), tree.n_edges());
    Ok(tree)
}
