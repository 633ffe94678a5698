//! Vote accumulation and the finalization decision rule.
//!
//! Confidence is stake-weighted: an Accepted vote adds the voter's weight,
//! saturating at the configured ceiling. A round counts as successful for
//! a candidate once an Accepted vote from that round leaves confidence at
//! or above the threshold, and a candidate finalizes after enough
//! consecutive successful rounds. Any vote that leaves confidence below
//! the threshold breaks the run.
//!
//! Votes must come from a diverse quorum: a peer that is among the last
//! `vote_diversity_window - 1` counted voters of a candidate is ignored
//! until others have voted, so one heavy peer cannot finalize a block on
//! its own.

use std::collections::{HashMap, HashSet};

use finality_ids::{BlockHash, NodeId};

use crate::config::{AdversePolicy, AvalancheConfig};
use crate::message::VoteValue;
use crate::vote_record::{Candidate, VoteRecord};

/// Thresholds applied by [`VoteTally`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionRule {
    pub confidence_threshold: u64,
    pub confidence_ceiling: u64,
    pub finalization_rounds: u32,
    pub rejection_votes: u32,
    pub adverse_policy: AdversePolicy,
    pub stale_vote_threshold: u64,
    pub stale_vote_factor: u64,
    pub vote_diversity_window: usize,
}

impl From<&AvalancheConfig> for DecisionRule {
    fn from(config: &AvalancheConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            confidence_ceiling: config.confidence_ceiling,
            finalization_rounds: config.finalization_rounds,
            rejection_votes: config.rejection_votes,
            adverse_policy: config.adverse_policy,
            stale_vote_threshold: config.stale_vote_threshold,
            stale_vote_factor: config.stale_vote_factor,
            vote_diversity_window: config.vote_diversity_window,
        }
    }
}

/// Result of counting one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Pending,
    /// The candidate just finalized. Its record is gone.
    Finalized,
    /// The candidate is rejected for good. Its record is gone.
    Rejected,
    /// Too few accepting votes to ever decide. The record is dropped
    /// without a decision.
    Stale,
}

/// Vote records of all active candidates.
#[derive(Debug)]
pub struct VoteTally {
    rule: DecisionRule,
    records: HashMap<BlockHash, VoteRecord>,
    /// Rejected hashes, kept until the block leaves the active chain.
    rejected: HashSet<BlockHash>,
}

impl VoteTally {
    pub fn new(rule: DecisionRule) -> Self {
        Self {
            rule,
            records: HashMap::new(),
            rejected: HashSet::new(),
        }
    }

    pub fn rule(&self) -> &DecisionRule {
        &self.rule
    }

    /// Starts tracking a candidate. Votes from rounds before
    /// `next_round` never count for it.
    ///
    /// Returns false if the candidate is already tracked or was rejected.
    pub fn register(&mut self, candidate: Candidate, next_round: u64) -> bool {
        if self.records.contains_key(&candidate.hash) || self.rejected.contains(&candidate.hash) {
            return false;
        }
        self.records
            .insert(candidate.hash, VoteRecord::new(candidate, next_round));
        true
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.records.contains_key(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&VoteRecord> {
        self.records.get(hash)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_rejected(&self, hash: &BlockHash) -> bool {
        self.rejected.contains(hash)
    }

    /// Counts a vote from `voter` in `round` carrying `weight` stake.
    ///
    /// Returns `None` when the candidate is not tracked, the round was
    /// opened before the candidate was registered, or the voter voted too
    /// recently.
    pub fn record_vote(
        &mut self,
        hash: &BlockHash,
        round: u64,
        voter: NodeId,
        value: VoteValue,
        weight: u64,
    ) -> Option<VoteOutcome> {
        let rule = self.rule;
        let record = self.records.get_mut(hash)?;
        if round < record.registered_round {
            return None;
        }
        if !record.admit_voter(voter, rule.vote_diversity_window) {
            return None;
        }

        record.counted_votes = record.counted_votes.saturating_add(1);
        record.last_round = Some(round);

        match value {
            VoteValue::Accepted => {
                record.accepted_votes = record.accepted_votes.saturating_add(1);
                record.adverse_streak = 0;
                record.confidence = record
                    .confidence
                    .saturating_add(weight)
                    .min(rule.confidence_ceiling);
                if record.confidence >= rule.confidence_threshold
                    && record.last_success_round.map_or(true, |last| round > last)
                {
                    record.consecutive_rounds += 1;
                    record.last_success_round = Some(round);
                }
            }
            VoteValue::Rejected | VoteValue::Invalid => {
                record.adverse_streak = record.adverse_streak.saturating_add(1);
                match rule.adverse_policy {
                    AdversePolicy::Decrement => {
                        record.confidence = record.confidence.saturating_sub(weight);
                    }
                    AdversePolicy::ResetStreak => {
                        record.consecutive_rounds = 0;
                        record.last_success_round = None;
                    }
                }
            }
            // Neutral: counted, moves nothing.
            VoteValue::Unknown => {}
        }

        if value != VoteValue::Unknown && record.confidence < rule.confidence_threshold {
            record.consecutive_rounds = 0;
            record.last_success_round = None;
        }

        let outcome = if record.consecutive_rounds >= rule.finalization_rounds {
            VoteOutcome::Finalized
        } else if record.adverse_streak >= rule.rejection_votes {
            VoteOutcome::Rejected
        } else if record.counted_votes >= rule.stale_vote_threshold
            && record.accepted_votes.saturating_mul(rule.stale_vote_factor) < record.counted_votes
        {
            VoteOutcome::Stale
        } else {
            VoteOutcome::Pending
        };

        match outcome {
            VoteOutcome::Pending => {}
            VoteOutcome::Rejected => {
                self.records.remove(hash);
                self.rejected.insert(*hash);
            }
            VoteOutcome::Finalized | VoteOutcome::Stale => {
                self.records.remove(hash);
            }
        }
        Some(outcome)
    }

    /// Drops a candidate's record, e.g. after a reorg.
    pub fn remove(&mut self, hash: &BlockHash) -> Option<VoteRecord> {
        self.records.remove(hash)
    }

    /// Forgets that a block was rejected so it can come back as a fresh
    /// candidate.
    pub fn forget_rejected(&mut self, hash: &BlockHash) -> bool {
        self.rejected.remove(hash)
    }

    /// Rejected hashes currently remembered.
    pub fn rejected(&self) -> &HashSet<BlockHash> {
        &self.rejected
    }

    /// Rejects a block without a vote, e.g. one building on a rejected
    /// block. Drops its record if it has one.
    pub fn reject(&mut self, hash: BlockHash) {
        self.records.remove(&hash);
        self.rejected.insert(hash);
    }

    /// Drops every record matching `predicate` and returns their hashes.
    pub fn drop_where<F>(&mut self, mut predicate: F) -> Vec<BlockHash>
    where
        F: FnMut(&VoteRecord) -> bool,
    {
        let dropped: Vec<BlockHash> = self
            .records
            .values()
            .filter(|record| predicate(record))
            .map(VoteRecord::hash)
            .collect();
        for hash in &dropped {
            self.records.remove(hash);
        }
        dropped
    }

    /// Up to `limit` candidates, highest first.
    pub fn candidates_by_height(&self, limit: usize) -> Vec<BlockHash> {
        let mut records: Vec<&VoteRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            b.height()
                .cmp(&a.height())
                .then_with(|| a.hash().cmp(&b.hash()))
        });
        records.into_iter().take(limit).map(VoteRecord::hash).collect()
    }

    pub fn hashes(&self) -> Vec<BlockHash> {
        self.records.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finality_ids::Id;
    use std::time::Instant;

    fn rule() -> DecisionRule {
        DecisionRule {
            confidence_threshold: 100,
            confidence_ceiling: 400,
            finalization_rounds: 3,
            rejection_votes: 4,
            adverse_policy: AdversePolicy::Decrement,
            stale_vote_threshold: 64,
            stale_vote_factor: 8,
            vote_diversity_window: 1,
        }
    }

    const PEER: NodeId = NodeId::from_bytes([7; 20]);

    fn candidate(tag: &[u8], height: u64) -> Candidate {
        Candidate {
            hash: Id::hash(tag),
            parent: Id::EMPTY,
            height,
            registered_at: Instant::now(),
        }
    }

    #[test]
    fn test_register_once() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        assert!(tally.register(c, 0));
        assert!(!tally.register(c, 5));
        assert_eq!(tally.len(), 1);
        assert_eq!(tally.get(&c.hash).unwrap().registered_round(), 0);
    }

    #[test]
    fn test_finalizes_after_consecutive_rounds() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        // Round 0 reaches the threshold with its second vote
        assert_eq!(
            tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 60),
            Some(VoteOutcome::Pending)
        );
        assert_eq!(tally.get(&c.hash).unwrap().consecutive_rounds(), 0);
        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 60);
        assert_eq!(tally.get(&c.hash).unwrap().consecutive_rounds(), 1);

        // More votes in the same round do not extend the streak
        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 60);
        assert_eq!(tally.get(&c.hash).unwrap().consecutive_rounds(), 1);

        tally.record_vote(&c.hash, 1, PEER, VoteValue::Accepted, 60);
        assert_eq!(
            tally.record_vote(&c.hash, 2, PEER, VoteValue::Accepted, 60),
            Some(VoteOutcome::Finalized)
        );
        assert!(!tally.contains(&c.hash));
    }

    #[test]
    fn test_confidence_saturates_at_ceiling() {
        let mut tally = VoteTally::new(DecisionRule {
            finalization_rounds: 100,
            ..rule()
        });
        let c = candidate(b"a", 1);
        tally.register(c, 0);
        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, u64::MAX);
        assert_eq!(tally.get(&c.hash).unwrap().confidence(), 400);
    }

    #[test]
    fn test_decrement_clamps_and_breaks_streak() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 150);
        tally.record_vote(&c.hash, 1, PEER, VoteValue::Accepted, 10);
        assert_eq!(tally.get(&c.hash).unwrap().consecutive_rounds(), 2);

        tally.record_vote(&c.hash, 2, PEER, VoteValue::Rejected, 500);
        let record = tally.get(&c.hash).unwrap();
        assert_eq!(record.confidence(), 0);
        assert_eq!(record.consecutive_rounds(), 0);
        assert_eq!(record.adverse_streak(), 1);
    }

    #[test]
    fn test_adverse_above_threshold_keeps_streak() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 300);
        tally.record_vote(&c.hash, 1, PEER, VoteValue::Invalid, 50);
        let record = tally.get(&c.hash).unwrap();
        assert_eq!(record.confidence(), 250);
        assert_eq!(record.consecutive_rounds(), 1);
    }

    #[test]
    fn test_reset_streak_policy() {
        let mut tally = VoteTally::new(DecisionRule {
            adverse_policy: AdversePolicy::ResetStreak,
            ..rule()
        });
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 200);
        tally.record_vote(&c.hash, 1, PEER, VoteValue::Accepted, 1);
        tally.record_vote(&c.hash, 1, PEER, VoteValue::Rejected, 200);

        let record = tally.get(&c.hash).unwrap();
        assert_eq!(record.confidence(), 201);
        assert_eq!(record.consecutive_rounds(), 0);

        // A later accepted vote in the same round starts a new run
        tally.record_vote(&c.hash, 1, PEER, VoteValue::Accepted, 1);
        assert_eq!(tally.get(&c.hash).unwrap().consecutive_rounds(), 1);
    }

    #[test]
    fn test_unknown_is_neutral() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        tally.record_vote(&c.hash, 0, PEER, VoteValue::Accepted, 150);
        for round in 1..10 {
            assert_eq!(
                tally.record_vote(&c.hash, round, PEER, VoteValue::Unknown, 1_000),
                Some(VoteOutcome::Pending)
            );
        }
        let record = tally.get(&c.hash).unwrap();
        assert_eq!(record.confidence(), 150);
        assert_eq!(record.consecutive_rounds(), 1);
        assert_eq!(record.counted_votes(), 10);
    }

    #[test]
    fn test_rejection_is_terminal() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        for round in 0..3 {
            assert_eq!(
                tally.record_vote(&c.hash, round, PEER, VoteValue::Rejected, 10),
                Some(VoteOutcome::Pending)
            );
        }
        assert_eq!(
            tally.record_vote(&c.hash, 3, PEER, VoteValue::Invalid, 10),
            Some(VoteOutcome::Rejected)
        );
        assert!(tally.is_rejected(&c.hash));
        assert!(!tally.register(c, 4));
        assert_eq!(tally.record_vote(&c.hash, 4, PEER, VoteValue::Accepted, 500), None);

        // Only a fresh record after the block was orphaned
        assert!(tally.forget_rejected(&c.hash));
        assert!(tally.register(c, 10));
        assert_eq!(tally.get(&c.hash).unwrap().confidence(), 0);
    }

    #[test]
    fn test_accepted_vote_resets_adverse_streak() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        for round in 0..3 {
            tally.record_vote(&c.hash, round, PEER, VoteValue::Rejected, 1);
        }
        tally.record_vote(&c.hash, 3, PEER, VoteValue::Accepted, 1);
        assert_eq!(tally.get(&c.hash).unwrap().adverse_streak(), 0);
        assert_eq!(
            tally.record_vote(&c.hash, 4, PEER, VoteValue::Rejected, 1),
            Some(VoteOutcome::Pending)
        );
    }

    #[test]
    fn test_votes_before_registration_ignored() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 7);
        assert_eq!(tally.record_vote(&c.hash, 6, PEER, VoteValue::Accepted, 500), None);
        assert_eq!(tally.get(&c.hash).unwrap().counted_votes(), 0);
    }

    #[test]
    fn test_stale_candidate_dropped() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        let mut outcome = None;
        for round in 0..64 {
            outcome = tally.record_vote(&c.hash, round, PEER, VoteValue::Unknown, 1);
        }
        assert_eq!(outcome, Some(VoteOutcome::Stale));
        assert!(!tally.contains(&c.hash));
        assert!(!tally.is_rejected(&c.hash));
        assert!(tally.register(c, 64));
    }

    #[test]
    fn test_candidates_by_height() {
        let mut tally = VoteTally::new(rule());
        tally.register(candidate(b"low", 1), 0);
        tally.register(candidate(b"high", 9), 0);
        tally.register(candidate(b"mid", 5), 0);

        assert_eq!(
            tally.candidates_by_height(2),
            vec![Id::hash(b"high"), Id::hash(b"mid")]
        );

        let dropped = tally.drop_where(|r| r.height() < 5);
        assert_eq!(dropped, vec![Id::hash(b"low")]);
        assert_eq!(tally.len(), 2);
    }

    #[test]
    fn test_single_peer_cannot_finalize_alone() {
        let mut tally = VoteTally::new(DecisionRule {
            vote_diversity_window: 2,
            ..rule()
        });
        let c = candidate(b"a", 1);
        tally.register(c, 0);
        let (a, b) = (NodeId::from_bytes([1; 20]), NodeId::from_bytes([2; 20]));

        // Enough stake to pass the threshold in one vote
        assert_eq!(
            tally.record_vote(&c.hash, 0, a, VoteValue::Accepted, 500),
            Some(VoteOutcome::Pending)
        );
        for round in 1..10 {
            assert_eq!(tally.record_vote(&c.hash, round, a, VoteValue::Accepted, 500), None);
        }
        let record = tally.get(&c.hash).unwrap();
        assert_eq!(record.consecutive_rounds(), 1);
        assert_eq!(record.counted_votes(), 1);

        // A second peer lets the first vote again, alternating
        tally.record_vote(&c.hash, 10, b, VoteValue::Accepted, 500);
        assert_eq!(
            tally.record_vote(&c.hash, 11, a, VoteValue::Accepted, 500),
            Some(VoteOutcome::Finalized)
        );
    }

    #[test]
    fn test_reject_without_votes() {
        let mut tally = VoteTally::new(rule());
        let c = candidate(b"a", 1);
        tally.register(c, 0);

        tally.reject(c.hash);
        assert!(!tally.contains(&c.hash));
        assert!(tally.is_rejected(&c.hash));
        assert!(!tally.register(c, 1));
    }
}
