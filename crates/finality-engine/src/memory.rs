//! In-memory chain and transaction index.
//!
//! Backs the tests and local simulations. Blocks are mined on demand; the
//! longest chain is active, so mining on a fork past the tip reorganizes.

use std::collections::{HashMap, HashSet};

use finality_ids::{BlockHash, Id, TxId};
use parking_lot::RwLock;

use crate::chain::{BlockHeader, ChainState, IndexState, TransactionIndex, TxLocation};

#[derive(Debug)]
struct StoredBlock {
    header: BlockHeader,
    txs: HashSet<TxId>,
}

#[derive(Debug)]
struct ChainInner {
    blocks: HashMap<BlockHash, StoredBlock>,
    /// Active chain, indexed by height.
    active: Vec<BlockHash>,
    mempool: HashSet<TxId>,
    tx_index: HashMap<TxId, BlockHash>,
    index_state: IndexState,
    nonce: u64,
}

impl ChainInner {
    fn next_hash(&mut self, parent: &BlockHash, height: u64) -> BlockHash {
        self.nonce += 1;
        let mut data = Vec::with_capacity(48);
        data.extend_from_slice(parent.as_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        Id::hash(&data)
    }

    /// Rebuilds the active chain backwards from `tip`.
    fn activate(&mut self, tip: BlockHash) {
        let mut path = Vec::new();
        let mut current = Some(tip);
        while let Some(hash) = current {
            let Some(block) = self.blocks.get(&hash) else {
                break;
            };
            path.push(hash);
            current = (!block.header.is_genesis()).then_some(block.header.parent);
        }
        path.reverse();
        self.active = path;
    }

    fn tip(&self) -> Option<BlockHeader> {
        self.active
            .last()
            .and_then(|hash| self.blocks.get(hash))
            .map(|block| block.header)
    }
}

/// A chain held entirely in memory.
#[derive(Debug)]
pub struct MemoryChain {
    inner: RwLock<ChainInner>,
    genesis: BlockHash,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChain {
    /// Creates a chain holding only a genesis block, with a synced index.
    pub fn new() -> Self {
        let genesis = Id::hash(b"genesis");
        let header = BlockHeader {
            hash: genesis,
            parent: Id::EMPTY,
            height: 0,
            has_data: true,
        };
        let mut blocks = HashMap::new();
        blocks.insert(
            genesis,
            StoredBlock {
                header,
                txs: HashSet::new(),
            },
        );

        Self {
            inner: RwLock::new(ChainInner {
                blocks,
                active: vec![genesis],
                mempool: HashSet::new(),
                tx_index: HashMap::new(),
                index_state: IndexState::Synced,
                nonce: 0,
            }),
            genesis,
        }
    }

    pub fn genesis(&self) -> BlockHash {
        self.genesis
    }

    pub fn tip_hash(&self) -> BlockHash {
        self.inner.read().active.last().copied().unwrap_or(self.genesis)
    }

    pub fn height(&self) -> u64 {
        self.inner.read().active.len().saturating_sub(1) as u64
    }

    /// Mines a block with `txids` on top of the active tip.
    pub fn mine(&self, txids: &[TxId]) -> BlockHash {
        let tip = self.tip_hash();
        self.mine_on(&tip, txids)
    }

    /// Mines a block on `parent`. It becomes the tip if it extends the
    /// longest chain. Returns the empty id for an unknown parent.
    pub fn mine_on(&self, parent: &BlockHash, txids: &[TxId]) -> BlockHash {
        let mut inner = self.inner.write();
        let Some(parent_height) = inner.blocks.get(parent).map(|b| b.header.height) else {
            return Id::EMPTY;
        };

        let height = parent_height + 1;
        let hash = inner.next_hash(parent, height);
        inner.blocks.insert(
            hash,
            StoredBlock {
                header: BlockHeader {
                    hash,
                    parent: *parent,
                    height,
                    has_data: true,
                },
                txs: txids.iter().copied().collect(),
            },
        );
        for txid in txids {
            inner.mempool.remove(txid);
            inner.tx_index.insert(*txid, hash);
        }

        if height as usize >= inner.active.len() {
            inner.activate(hash);
        }
        hash
    }

    /// Adds a header whose block data has not been downloaded. It never
    /// becomes active.
    pub fn add_header(&self, parent: &BlockHash) -> BlockHash {
        let mut inner = self.inner.write();
        let height = inner
            .blocks
            .get(parent)
            .map_or(0, |b| b.header.height + 1);
        let hash = inner.next_hash(parent, height);
        inner.blocks.insert(
            hash,
            StoredBlock {
                header: BlockHeader {
                    hash,
                    parent: *parent,
                    height,
                    has_data: false,
                },
                txs: HashSet::new(),
            },
        );
        hash
    }

    pub fn add_to_mempool(&self, txid: TxId) {
        self.inner.write().mempool.insert(txid);
    }

    pub fn set_index_state(&self, state: IndexState) {
        self.inner.write().index_state = state;
    }
}

impl ChainState for MemoryChain {
    fn block(&self, hash: &BlockHash) -> Option<BlockHeader> {
        self.inner.read().blocks.get(hash).map(|b| b.header)
    }

    fn tip(&self) -> Option<BlockHeader> {
        self.inner.read().tip()
    }

    fn is_active(&self, hash: &BlockHash) -> bool {
        let inner = self.inner.read();
        inner
            .blocks
            .get(hash)
            .and_then(|b| inner.active.get(b.header.height as usize))
            .map_or(false, |active| active == hash)
    }

    fn contains_transaction(&self, block: &BlockHash, txid: &TxId) -> bool {
        self.inner
            .read()
            .blocks
            .get(block)
            .map_or(false, |b| b.txs.contains(txid))
    }
}

impl TransactionIndex for MemoryChain {
    fn lookup(&self, txid: &TxId) -> TxLocation {
        let inner = self.inner.read();
        if inner.mempool.contains(txid) {
            return TxLocation::Mempool;
        }
        if inner.index_state != IndexState::Synced {
            return TxLocation::NotFound;
        }
        inner
            .tx_index
            .get(txid)
            .map_or(TxLocation::NotFound, |block| TxLocation::Block(*block))
    }

    fn index_state(&self) -> IndexState {
        self.inner.read().index_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mine_extends_tip() {
        let chain = MemoryChain::new();
        let a = chain.mine(&[]);
        let b = chain.mine(&[]);

        assert_eq!(chain.tip_hash(), b);
        assert_eq!(chain.height(), 2);
        let header = chain.block(&b).unwrap();
        assert_eq!(header.parent, a);
        assert_eq!(header.height, 2);

        let ancestors: Vec<_> = chain.ancestors(&b, 10).iter().map(|h| h.hash).collect();
        assert_eq!(ancestors, vec![a, chain.genesis()]);
        assert_eq!(chain.ancestors(&b, 1).len(), 1);
    }

    #[test]
    fn test_longer_fork_reorganizes() {
        let chain = MemoryChain::new();
        let a = chain.mine(&[]);
        let b = chain.mine(&[]);

        let fork1 = chain.mine_on(&a, &[]);
        // Same height as b: no reorg
        assert_eq!(chain.tip_hash(), b);
        assert!(!chain.is_active(&fork1));

        let fork2 = chain.mine_on(&fork1, &[]);
        assert_eq!(chain.tip_hash(), fork2);
        assert!(chain.is_active(&fork1));
        assert!(!chain.is_active(&b));
        assert!(chain.is_active(&a));
    }

    #[test]
    fn test_mining_clears_mempool() {
        let chain = MemoryChain::new();
        let tx = Id::hash(b"tx");
        chain.add_to_mempool(tx);
        assert_eq!(chain.lookup(&tx), TxLocation::Mempool);

        let block = chain.mine(&[tx]);
        assert_eq!(chain.lookup(&tx), TxLocation::Block(block));
        assert!(chain.contains_transaction(&block, &tx));

        chain.set_index_state(IndexState::Disabled);
        assert_eq!(chain.lookup(&tx), TxLocation::NotFound);
    }

    #[test]
    fn test_header_only_block() {
        let chain = MemoryChain::new();
        let header = chain.add_header(&chain.genesis());
        let stored = chain.block(&header).unwrap();
        assert!(!stored.has_data);
        assert!(!chain.is_active(&header));
        assert_eq!(chain.tip_hash(), chain.genesis());
    }
}
