use crate::base::TokenReader;
use crate::errors::CheckpointError;
use crate::tree::Tree;
use rand::Rng;
use std::io::{self, BufRead, Write};

/// A persisted component of the chain.
///
/// Creation is the implementor's constructor and deletion its `Drop`; the
/// trait only covers what the chain does uniformly with each of them: draw
/// a state from the prior and move that state through a checkpoint. The
/// tree is passed along because the branch process keeps its lengths
/// there.
pub trait StochasticProcess {
    /// Replace the current state by a draw from the prior.
    fn sample<R: Rng + ?Sized>(&mut self, tree: &mut Tree, rng: &mut R);

    /// Write the state as whitespace-separated tokens.
    fn to_stream<W: Write>(&self, tree: &Tree, out: &mut W) -> io::Result<()>;

    /// Read back what [`StochasticProcess::to_stream`] wrote.
    fn from_stream<R: BufRead>(
        &mut self,
        tree: &mut Tree,
        tokens: &mut TokenReader<R>,
    ) -> Result<(), CheckpointError>;
}
