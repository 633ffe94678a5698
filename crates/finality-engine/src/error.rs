//! Error types for the finality engine.

use finality_ids::{BlockHash, NodeId, TxId};
use thiserror::Error;

/// Result type for finality queries.
pub type Result<T> = std::result::Result<T, FinalityError>;

/// Broad category of a query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The quorum is not established yet. Retry later.
    Readiness,
    /// The block or transaction is unknown. Permanent for that input.
    NotFound,
    /// The answer depends on state that is still being built.
    Ambiguous,
}

/// Errors returned by the finality query surface.
///
/// Display strings match what the RPC layer reports to users.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FinalityError {
    #[error("Avalanche is not ready to poll yet.")]
    NotReady,

    #[error("Block not found")]
    BlockNotFound(BlockHash),

    #[error("No such transaction found in the provided block.")]
    TxNotInBlock { txid: TxId, block: BlockHash },

    #[error(
        "No such transaction. Use -txindex or provide a block hash to enable blockchain transaction queries."
    )]
    NeedsIndexOrBlockHash(TxId),

    #[error("No such transaction. Blockchain transactions are still in the process of being indexed.")]
    StillIndexing(TxId),

    #[error("No such mempool or blockchain transaction.")]
    TxNotFound(TxId),

    /// The header is known but the block body has not been downloaded.
    #[error("Block data not downloaded yet.")]
    BlockNotDownloaded(BlockHash),
}

impl FinalityError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady => ErrorKind::Readiness,
            Self::StillIndexing(_) | Self::BlockNotDownloaded(_) => ErrorKind::Ambiguous,
            Self::BlockNotFound(_)
            | Self::TxNotInBlock { .. }
            | Self::NeedsIndexOrBlockHash(_)
            | Self::TxNotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Returns true if the same query may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::NotFound)
    }
}

/// Reasons a poll response is dropped.
///
/// These never reach query callers; the engine loop logs them and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("peer {0} is not in the quorum")]
    UnknownPeer(NodeId),

    #[error("response from {0} is not signed")]
    MissingSignature(NodeId),

    #[error("invalid signature from {0}")]
    InvalidSignature(NodeId),

    /// Round unknown or expired, peer not polled, or peer already answered.
    #[error("unexpected-ava-response: round {round} from {peer}")]
    UnexpectedResponse { round: u64, peer: NodeId },

    #[error("invalid-ava-response-size: expected {expected} votes, got {actual}")]
    InvalidResponseSize { expected: usize, actual: usize },

    #[error("invalid-ava-response-content: vote {index} does not match the polled candidate")]
    InvalidResponseContent { index: usize },

    #[error("unknown vote code {0}")]
    UnknownVoteCode(i32),

    #[error("response carries {votes} votes, more than the wire format can count")]
    OversizedResponse { votes: usize },

    #[error("failed to sign response: {0}")]
    Signing(String),
}

/// Errors raised by quorum membership changes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuorumError {
    #[error("peer {0} is already a quorum member")]
    AlreadyMember(NodeId),

    #[error("peer {0} is not a quorum member")]
    NotMember(NodeId),
}

/// Errors raised when a poll cannot be delivered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
