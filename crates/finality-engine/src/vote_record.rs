//! Per-candidate vote state.

use std::collections::VecDeque;
use std::time::Instant;

use finality_ids::{BlockHash, NodeId};

use crate::chain::BlockHeader;

/// A block under finality voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub hash: BlockHash,
    pub parent: BlockHash,
    pub height: u64,
    pub registered_at: Instant,
}

impl Candidate {
    pub fn from_header(header: &BlockHeader, now: Instant) -> Self {
        Self {
            hash: header.hash,
            parent: header.parent,
            height: header.height,
            registered_at: now,
        }
    }
}

/// Tally state of one candidate.
///
/// Created when the candidate is registered and dropped once it is
/// decided or orphaned. Only [`VoteTally`](crate::tally::VoteTally)
/// mutates it.
#[derive(Debug, Clone)]
pub struct VoteRecord {
    pub(crate) candidate: Candidate,
    /// First round id allowed to count.
    pub(crate) registered_round: u64,
    pub(crate) confidence: u64,
    pub(crate) consecutive_rounds: u32,
    pub(crate) last_success_round: Option<u64>,
    pub(crate) adverse_streak: u32,
    pub(crate) counted_votes: u64,
    pub(crate) accepted_votes: u64,
    pub(crate) last_round: Option<u64>,
    /// Most recent counted voters, oldest first.
    pub(crate) recent_voters: VecDeque<NodeId>,
}

impl VoteRecord {
    pub fn new(candidate: Candidate, registered_round: u64) -> Self {
        Self {
            candidate,
            registered_round,
            confidence: 0,
            consecutive_rounds: 0,
            last_success_round: None,
            adverse_streak: 0,
            counted_votes: 0,
            accepted_votes: 0,
            last_round: None,
            recent_voters: VecDeque::new(),
        }
    }

    /// Admits a vote from `voter` unless it is one of the last
    /// `window - 1` counted voters. A window of 1 admits every vote.
    pub(crate) fn admit_voter(&mut self, voter: NodeId, window: usize) -> bool {
        let keep = window.saturating_sub(1);
        if self.recent_voters.contains(&voter) {
            return false;
        }
        self.recent_voters.push_back(voter);
        while self.recent_voters.len() > keep {
            self.recent_voters.pop_front();
        }
        true
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn hash(&self) -> BlockHash {
        self.candidate.hash
    }

    pub fn height(&self) -> u64 {
        self.candidate.height
    }

    pub fn registered_round(&self) -> u64 {
        self.registered_round
    }

    /// Stake-weighted support.
    pub fn confidence(&self) -> u64 {
        self.confidence
    }

    /// Consecutive rounds that ended at or above the threshold.
    pub fn consecutive_rounds(&self) -> u32 {
        self.consecutive_rounds
    }

    pub fn adverse_streak(&self) -> u32 {
        self.adverse_streak
    }

    pub fn counted_votes(&self) -> u64 {
        self.counted_votes
    }

    pub fn accepted_votes(&self) -> u64 {
        self.accepted_votes
    }

    /// Round of the most recent counted vote.
    pub fn last_round(&self) -> Option<u64> {
        self.last_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finality_ids::Id;

    fn record() -> VoteRecord {
        VoteRecord::new(
            Candidate {
                hash: Id::hash(b"block"),
                parent: Id::EMPTY,
                height: 1,
                registered_at: Instant::now(),
            },
            0,
        )
    }

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 20])
    }

    #[test]
    fn test_repeat_voter_waits_for_the_quorum() {
        let mut record = record();
        for byte in 1..=4 {
            assert!(record.admit_voter(node(byte), 4));
        }
        // 2, 3 and 4 voted more recently than 1
        assert!(!record.admit_voter(node(4), 4));
        assert!(!record.admit_voter(node(2), 4));
        assert!(record.admit_voter(node(1), 4));
        assert!(!record.admit_voter(node(1), 4));
        assert!(record.admit_voter(node(2), 4));
    }

    #[test]
    fn test_window_of_one_admits_everyone() {
        let mut record = record();
        for _ in 0..3 {
            assert!(record.admit_voter(node(1), 1));
        }
        assert!(record.recent_voters.is_empty());
    }
}
