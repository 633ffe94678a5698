//! Identifier types used by the Avalanche finality subsystem.
//!
//! This crate provides:
//! - [`Id`]: a 32-byte hash identifying a block or a transaction
//! - [`NodeId`]: a 20-byte identifier for a quorum peer
//!
//! Block and transaction hashes are displayed as hex in reversed byte order,
//! the way block explorers and node RPCs print them.

mod hashing;
mod id;
mod node_id;

pub use hashing::{compute_double_hash256, compute_hash256, Hash256};
pub use id::{Id, IdError};
pub use node_id::{NodeId, NodeIdError, NODE_ID_PREFIX};

/// Length of an ID in bytes (32 bytes / 256 bits).
pub const ID_LEN: usize = 32;

/// Length of a NodeID in bytes (20 bytes / 160 bits).
pub const NODE_ID_LEN: usize = 20;

/// Block hashes and transaction ids share the same representation.
pub type BlockHash = Id;

/// Transaction identifier.
pub type TxId = Id;
