//! The finality ledger.
//!
//! Records which blocks are final and answers block and transaction
//! finality queries. Finality is monotonic along ancestry: marking a block
//! final marks every ancestor the chain knows about, walking parents with
//! an explicit stack until it meets a block that is already final.
//!
//! Transaction finality is never stored. A transaction is final iff the
//! block containing it is final.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use finality_ids::{BlockHash, TxId};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::chain::{ChainState, IndexState, TransactionIndex, TxLocation};
use crate::error::{FinalityError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A finalized block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityRecord {
    pub hash: BlockHash,
    pub height: u64,
    pub finalized_at: DateTime<Utc>,
    /// True if the block was voted final, false if it became final as an
    /// ancestor of one.
    pub direct: bool,
}

/// Broadcast once per block when it becomes final.
pub type FinalizationEvent = FinalityRecord;

pub struct FinalityLedger {
    chain: Arc<dyn ChainState>,
    index: Arc<dyn TransactionIndex>,
    records: RwLock<HashMap<BlockHash, FinalityRecord>>,
    tip: RwLock<Option<FinalityRecord>>,
    events: broadcast::Sender<FinalizationEvent>,
}

impl std::fmt::Debug for FinalityLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalityLedger")
            .field("finalized", &self.records.read().len())
            .field("tip", &*self.tip.read())
            .finish()
    }
}

impl FinalityLedger {
    pub fn new(chain: Arc<dyn ChainState>, index: Arc<dyn TransactionIndex>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            chain,
            index,
            records: RwLock::new(HashMap::new()),
            tip: RwLock::new(None),
            events,
        }
    }

    /// Subscribes to finalization events.
    pub fn subscribe(&self) -> broadcast::Receiver<FinalizationEvent> {
        self.events.subscribe()
    }

    /// Marks `hash` and all its known ancestors final.
    ///
    /// Idempotent. Returns the blocks that became final with this call,
    /// the voted block first. Unknown blocks are ignored. Nothing is
    /// marked if the block or any ancestor still to be marked is in
    /// `rejected`.
    pub fn mark_final(
        &self,
        hash: &BlockHash,
        rejected: &HashSet<BlockHash>,
    ) -> Vec<FinalityRecord> {
        let now = Utc::now();
        let mut newly = Vec::new();
        {
            let mut records = self.records.write();

            let mut path = Vec::new();
            let mut stack = vec![*hash];
            while let Some(current) = stack.pop() {
                if records.contains_key(&current) {
                    continue;
                }
                // A gap in the chain ends the walk.
                let Some(header) = self.chain.block(&current) else {
                    continue;
                };
                if rejected.contains(&current) {
                    warn!("Refusing to finalize {} on top of rejected block {}", hash, current);
                    return Vec::new();
                }
                path.push(header);
                if !header.is_genesis() {
                    stack.push(header.parent);
                }
            }

            for header in path {
                let record = FinalityRecord {
                    hash: header.hash,
                    height: header.height,
                    finalized_at: now,
                    direct: header.hash == *hash,
                };
                records.insert(header.hash, record);
                newly.push(record);
            }

            if let Some(highest) = newly.iter().max_by_key(|r| r.height) {
                let mut tip = self.tip.write();
                if tip.map_or(true, |t| highest.height > t.height) {
                    *tip = Some(*highest);
                }
            }
        }

        for record in &newly {
            if record.direct {
                info!("Avalanche finalized block {}", record.hash);
            } else {
                debug!(height = record.height, "Avalanche finalized ancestor {}", record.hash);
            }
            // No subscribers is fine.
            let _ = self.events.send(*record);
        }
        newly
    }

    /// Returns true if the block is final. Unknown blocks are not.
    pub fn is_final(&self, hash: &BlockHash) -> bool {
        self.records.read().contains_key(hash)
    }

    /// Finality of a block the chain knows about.
    pub fn is_final_block(&self, hash: &BlockHash) -> Result<bool> {
        if self.chain.block(hash).is_none() {
            return Err(FinalityError::BlockNotFound(*hash));
        }
        Ok(self.is_final(hash))
    }

    /// Finality of a transaction, optionally within a given block.
    pub fn is_final_transaction(&self, txid: &TxId, block: Option<&BlockHash>) -> Result<bool> {
        if let Some(block) = block {
            return self.is_final_in_block(txid, block);
        }

        match self.index.lookup(txid) {
            // Unconfirmed transactions are never final.
            TxLocation::Mempool => Ok(false),
            TxLocation::Block(block) => self.is_final_in_block(txid, &block),
            TxLocation::NotFound => match self.index.index_state() {
                IndexState::Disabled => Err(FinalityError::NeedsIndexOrBlockHash(*txid)),
                IndexState::Syncing => Err(FinalityError::StillIndexing(*txid)),
                IndexState::Synced => Err(FinalityError::TxNotFound(*txid)),
            },
        }
    }

    fn is_final_in_block(&self, txid: &TxId, block: &BlockHash) -> Result<bool> {
        let header = self
            .chain
            .block(block)
            .ok_or(FinalityError::BlockNotFound(*block))?;
        if !header.has_data {
            return Err(FinalityError::BlockNotDownloaded(*block));
        }
        if !self.chain.contains_transaction(block, txid) {
            return Err(FinalityError::TxNotInBlock {
                txid: *txid,
                block: *block,
            });
        }
        Ok(self.is_final(block))
    }

    /// Highest finalized block.
    pub fn finalized_tip(&self) -> Option<FinalityRecord> {
        *self.tip.read()
    }

    pub fn record(&self, hash: &BlockHash) -> Option<FinalityRecord> {
        self.records.read().get(hash).copied()
    }

    /// Number of finalized blocks.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChain;
    use finality_ids::Id;

    fn ledger_on(chain: &Arc<MemoryChain>) -> FinalityLedger {
        FinalityLedger::new(chain.clone(), chain.clone())
    }

    fn none() -> HashSet<BlockHash> {
        HashSet::new()
    }

    #[test]
    fn test_mark_final_walks_ancestors() {
        let chain = Arc::new(MemoryChain::new());
        let a = chain.mine(&[]);
        let b = chain.mine(&[]);
        let c = chain.mine(&[]);
        let ledger = ledger_on(&chain);

        let newly = ledger.mark_final(&b, &none());
        let hashes: Vec<_> = newly.iter().map(|r| r.hash).collect();
        assert_eq!(hashes, vec![b, a, chain.genesis()]);
        assert!(newly[0].direct);
        assert!(!newly[1].direct);

        assert!(ledger.is_final_block(&a).unwrap());
        assert!(!ledger.is_final_block(&c).unwrap());
        assert_eq!(ledger.finalized_tip().unwrap().hash, b);

        // The walk stops at b
        let newly = ledger.mark_final(&c, &none());
        assert_eq!(newly.len(), 1);
        assert_eq!(ledger.finalized_tip().unwrap().height, 3);
    }

    #[test]
    fn test_mark_final_is_idempotent() {
        let chain = Arc::new(MemoryChain::new());
        let a = chain.mine(&[]);
        let ledger = ledger_on(&chain);
        let mut events = ledger.subscribe();

        assert_eq!(ledger.mark_final(&a, &none()).len(), 2);
        assert!(ledger.mark_final(&a, &none()).is_empty());

        assert_eq!(events.try_recv().unwrap().hash, a);
        assert_eq!(events.try_recv().unwrap().hash, chain.genesis());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_mark_final_refuses_rejected_ancestry() {
        let chain = Arc::new(MemoryChain::new());
        let a = chain.mine(&[]);
        let rejected_block = chain.mine(&[]);
        let child = chain.mine(&[]);
        let ledger = ledger_on(&chain);
        let mut events = ledger.subscribe();
        let rejected: HashSet<BlockHash> = [rejected_block].into_iter().collect();

        assert!(ledger.mark_final(&child, &rejected).is_empty());
        assert!(ledger.mark_final(&rejected_block, &rejected).is_empty());
        assert!(ledger.is_empty());
        assert!(events.try_recv().is_err());

        // Blocks below the rejected one are unaffected
        assert_eq!(ledger.mark_final(&a, &rejected).len(), 2);
        assert!(!ledger.is_final(&rejected_block));
        assert!(!ledger.is_final(&child));
    }

    #[test]
    fn test_mark_final_unknown_block() {
        let chain = Arc::new(MemoryChain::new());
        let ledger = ledger_on(&chain);
        assert!(ledger.mark_final(&Id::hash(b"nowhere"), &none()).is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_unknown_block() {
        let chain = Arc::new(MemoryChain::new());
        let ledger = ledger_on(&chain);
        let hash = Id::hash(b"unknown");
        assert_eq!(
            ledger.is_final_block(&hash),
            Err(FinalityError::BlockNotFound(hash))
        );
    }

    #[test]
    fn test_transaction_in_block() {
        let chain = Arc::new(MemoryChain::new());
        let tx = Id::hash(b"tx");
        let block = chain.mine(&[tx]);
        let other = chain.mine(&[]);
        let ledger = ledger_on(&chain);

        assert_eq!(ledger.is_final_transaction(&tx, Some(&block)), Ok(false));
        assert_eq!(
            ledger.is_final_transaction(&tx, Some(&other)),
            Err(FinalityError::TxNotInBlock { txid: tx, block: other })
        );

        ledger.mark_final(&block, &none());
        assert_eq!(ledger.is_final_transaction(&tx, Some(&block)), Ok(true));
        assert_eq!(ledger.is_final_transaction(&tx, None), Ok(true));
    }

    #[test]
    fn test_header_only_block() {
        let chain = Arc::new(MemoryChain::new());
        let header = chain.add_header(&chain.genesis());
        let ledger = ledger_on(&chain);
        let tx = Id::hash(b"tx");

        assert_eq!(ledger.is_final_block(&header), Ok(false));
        assert_eq!(
            ledger.is_final_transaction(&tx, Some(&header)),
            Err(FinalityError::BlockNotDownloaded(header))
        );
    }

    #[test]
    fn test_transaction_resolution_without_block() {
        let chain = Arc::new(MemoryChain::new());
        let ledger = ledger_on(&chain);
        let pending = Id::hash(b"pending");
        let missing = Id::hash(b"missing");
        chain.add_to_mempool(pending);

        assert_eq!(ledger.is_final_transaction(&pending, None), Ok(false));
        assert_eq!(
            ledger.is_final_transaction(&missing, None),
            Err(FinalityError::TxNotFound(missing))
        );

        chain.set_index_state(IndexState::Syncing);
        assert_eq!(
            ledger.is_final_transaction(&missing, None),
            Err(FinalityError::StillIndexing(missing))
        );

        chain.set_index_state(IndexState::Disabled);
        assert_eq!(
            ledger.is_final_transaction(&missing, None),
            Err(FinalityError::NeedsIndexOrBlockHash(missing))
        );
        // The mempool answers without the index
        assert_eq!(ledger.is_final_transaction(&pending, None), Ok(false));
    }
}
