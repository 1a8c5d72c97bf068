//! Commands the coordinator broadcasts and the replies workers gather back.

use crate::process::{MappingStatistics, ModelView};
use crate::tree::Tree;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Snapshot of every global parameter, mirrored on the workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalParameters {
    pub tree: Tree,
    pub branch_shape: f64,
    pub branch_rate: f64,
    pub alpha: f64,
    pub rates: Vec<f64>,
    pub categories: Vec<usize>,
    pub dir_weights: Vec<f64>,
    pub profiles: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
    pub allocation: Vec<usize>,
}

impl GlobalParameters {
    pub fn view(&self) -> ModelView<'_> {
        ModelView {
            tree: &self.tree,
            rates: &self.rates,
            profiles: &self.profiles,
            weights: &self.weights,
            allocation: &self.allocation,
        }
    }

    /// Same parameters on another tree.
    pub fn view_with<'a>(&'a self, tree: &'a Tree) -> ModelView<'a> {
        ModelView {
            tree,
            ..self.view()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    UpdateParameters(Box<GlobalParameters>),
    ProposeTree(Box<Tree>),
    Resolve { accept: bool },
    Collapse,
    Unfold,
    LogLikelihood,
    FullLogLikelihood,
    SiteLogLikelihoods,
    /// Score the worker's slice of another alignment over the same taxa.
    CrossValidation { path: PathBuf },
    Shutdown,
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateParameters(_) => "update-parameters",
            Self::ProposeTree(_) => "propose-tree",
            Self::Resolve { .. } => "resolve",
            Self::Collapse => "collapse",
            Self::Unfold => "unfold",
            Self::LogLikelihood => "log-likelihood",
            Self::FullLogLikelihood => "full-log-likelihood",
            Self::SiteLogLikelihoods => "site-log-likelihoods",
            Self::CrossValidation { .. } => "cross-validation",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Ack,
    LogLikelihood(f64),
    Statistics(MappingStatistics),
    SiteLogLikelihoods(Vec<f64>),
    Failed(String),
}
