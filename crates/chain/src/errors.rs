//! Error types for the chain crate.
//!
//! Every error here is terminal for the operation that raised it: the
//! chain never retries and never continues in a degraded mode. A rejected
//! Metropolis proposal is an ordinary outcome and never shows up as an
//! error.

use phylomix_comm::CommError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating input data (alignment, tree,
/// empirical profiles).
#[derive(Debug, Error)]
pub enum DataError {
    /// An input file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The alignment text is malformed.
    #[error("alignment format error: {0}")]
    Alignment(String),

    /// The Newick text is malformed.
    #[error("newick error at byte {position}: {message}")]
    Newick { position: usize, message: String },

    /// Tree leaves and alignment taxa do not match.
    #[error("taxon mismatch: {0}")]
    TaxonMismatch(String),

    /// The empirical profile file is malformed.
    #[error("profile file error: {0}")]
    Profiles(String),
}

impl DataError {
    /// Wrap an I/O error with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while reading a checkpoint stream.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying I/O failure.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended before a required field.
    #[error("checkpoint truncated: missing {field}")]
    Truncated { field: &'static str },

    /// A field could not be parsed.
    #[error("checkpoint field {field} is malformed: '{value}'")]
    Malformed { field: &'static str, value: String },

    /// The tree stored in the checkpoint is invalid.
    #[error("checkpoint tree: {0}")]
    Tree(#[from] DataError),
}

/// Errors that can occur while assembling a chain configuration.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// A required parameter is missing.
    #[error("missing required parameter: {0}")]
    MissingRequired(&'static str),

    /// An invalid parameter value was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Top-level error of the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Unsupported or inconsistent construction parameters.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The collective transport failed (unreachable peer, bad payload).
    #[error("communication failure: {0}")]
    Comm(#[from] CommError),

    /// A worker reported a failure while executing a command.
    #[error("worker {rank} failed: {message}")]
    Worker { rank: usize, message: String },

    /// A command was issued in a state that does not allow it, such as a
    /// second collapse without an intervening unfold.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An earlier worker or transport failure left the ranks out of step;
    /// the chain refuses every further command.
    #[error("chain aborted after: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChainError>;
