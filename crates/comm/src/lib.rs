//! Collective operations for a fixed pool of cooperating chain processes.
//!
//! A pool has exactly one coordinator (rank 0) and `size - 1` workers. All
//! traffic goes through two synchronous collectives: a broadcast from the
//! coordinator and a gather to the coordinator. Every call blocks until the
//! peers on the other side have taken part, so each one doubles as a
//! barrier.

mod collective;
mod error;
mod local;
mod traits;

pub use collective::{broadcast, gather};
pub use error::CommError;
pub use local::{LocalCluster, LocalComm};
pub use traits::Communicator;

/// Rank of the coordinator in every pool.
pub const ROOT: usize = 0;
