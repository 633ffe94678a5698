//! Capabilities the engine needs from the node.
//!
//! The chain and the transaction index are owned by the node. The engine
//! only reads them, through these traits.

use finality_ids::{BlockHash, TxId};

/// What the chain knows about a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: BlockHash,
    /// `Id::EMPTY` for genesis.
    pub parent: BlockHash,
    pub height: u64,
    /// False while only the header has been received.
    pub has_data: bool,
}

impl BlockHeader {
    pub fn is_genesis(&self) -> bool {
        self.parent.is_empty()
    }
}

/// Read access to the block tree.
pub trait ChainState: Send + Sync {
    /// Looks up a block, header-only blocks included.
    fn block(&self, hash: &BlockHash) -> Option<BlockHeader>;

    /// Returns the tip of the active chain.
    fn tip(&self) -> Option<BlockHeader>;

    /// Returns true if the block is on the active chain.
    fn is_active(&self, hash: &BlockHash) -> bool;

    /// Returns true if the block's body contains the transaction.
    ///
    /// Only meaningful for blocks with data.
    fn contains_transaction(&self, block: &BlockHash, txid: &TxId) -> bool;

    /// Returns up to `limit` ancestors of `hash`, parent first.
    fn ancestors(&self, hash: &BlockHash, limit: usize) -> Vec<BlockHeader> {
        let mut ancestors = Vec::new();
        let mut current = self.block(hash);
        while let Some(header) = current {
            if ancestors.len() >= limit || header.is_genesis() {
                break;
            }
            current = self.block(&header.parent);
            if let Some(parent) = current {
                ancestors.push(parent);
            }
        }
        ancestors
    }
}

/// Where the transaction index places a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLocation {
    /// Mined in this block.
    Block(BlockHash),
    /// Unconfirmed, waiting in the mempool.
    Mempool,
    NotFound,
}

/// State of the optional transaction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Disabled,
    /// Enabled but still catching up with the chain.
    Syncing,
    Synced,
}

/// Transaction lookup across the mempool and the chain.
pub trait TransactionIndex: Send + Sync {
    /// Finds a transaction. The mempool is always consulted; mined
    /// transactions are only found when the index has them.
    fn lookup(&self, txid: &TxId) -> TxLocation;

    fn index_state(&self) -> IndexState;
}
