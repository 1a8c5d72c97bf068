use thiserror::Error;

/// Error type for collective operations.
///
/// Every variant is fatal to the chain: there is no partial-result
/// tolerance and no retry.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("invalid pool: {0}")]
    InvalidPool(String),
    #[error("peer {rank} disconnected")]
    Disconnected { rank: usize },
    #[error("encoding error: {0}")]
    Encode(String),
    #[error("decoding error: {0}")]
    Decode(String),
    #[error("collective misuse on rank {rank}: {message}")]
    Misuse { rank: usize, message: String },
}
