use crate::error::CommError;
use crate::ROOT;

/// Core trait for a pool transport.
///
/// Implementations move opaque byte payloads; typed values go through the
/// helpers in this crate, which encode them with bincode. Both operations
/// are collective: every rank of the pool must call them in the same order.
pub trait Communicator: Send {
    /// Rank of this process in the pool.
    fn rank(&self) -> usize;

    /// Number of processes in the pool, coordinator included.
    fn size(&self) -> usize;

    /// Broadcast from the coordinator. The coordinator passes `Some`, workers
    /// pass `None`; every rank returns the coordinator's payload.
    fn broadcast_bytes(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>, CommError>;

    /// Gather to the coordinator. Every rank contributes one payload; the
    /// coordinator receives all of them ordered by rank (its own first),
    /// workers receive `None`.
    fn gather_bytes(&self, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError>;

    /// Whether this process is the coordinator.
    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }
}
