//! Poll round bookkeeping and the readiness state machine.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use finality_ids::{BlockHash, NodeId};

use crate::config::{AvalancheConfig, MAX_DURATION_MS};
use crate::error::ProtocolError;
use crate::message::{Poll, Response};

/// State of the poll scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Quorum minimums not met yet. Queries fail.
    NotReady,
    /// Ready, no round open.
    Ready,
    /// At least one round is open.
    Polling,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::NotReady => write!(f, "NotReady"),
            SchedulerState::Ready => write!(f, "Ready"),
            SchedulerState::Polling => write!(f, "Polling"),
        }
    }
}

/// An open poll round.
#[derive(Debug, Clone)]
pub struct PollRound {
    pub id: u64,
    /// Offered candidates, in the order votes must come back.
    pub candidates: Vec<BlockHash>,
    pub issued_at: Instant,
    pub deadline: Instant,
    pub polled: HashSet<NodeId>,
    pub answered: HashSet<NodeId>,
}

impl PollRound {
    pub fn is_complete(&self) -> bool {
        self.answered.len() >= self.polled.len()
    }

    /// Polled peers that have not answered yet.
    pub fn outstanding(&self) -> impl Iterator<Item = &NodeId> {
        self.polled.difference(&self.answered)
    }
}

/// A response that passed round validation.
#[derive(Debug, Clone)]
pub struct AcceptedResponse {
    pub round: u64,
    pub candidates: Vec<BlockHash>,
    /// Every polled peer has now answered and the round is closed.
    pub completed: bool,
}

/// Owns round ids and open rounds.
#[derive(Debug)]
pub struct PollScheduler {
    state: SchedulerState,
    rounds: BTreeMap<u64, PollRound>,
    next_round: u64,
    min_quorum_stake: u64,
    min_quorum_members: usize,
    query_timeout: Duration,
    max_inflight_rounds: usize,
}

impl PollScheduler {
    pub fn new(config: &AvalancheConfig) -> Self {
        Self {
            state: SchedulerState::NotReady,
            rounds: BTreeMap::new(),
            next_round: 0,
            min_quorum_stake: config.min_quorum_stake,
            min_quorum_members: config.min_quorum_members,
            query_timeout: config
                .query_timeout()
                .min(Duration::from_millis(MAX_DURATION_MS)),
            max_inflight_rounds: config.max_inflight_rounds,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state != SchedulerState::NotReady
    }

    /// Re-evaluates readiness against the current quorum.
    ///
    /// Readiness latches: once reached it is kept even if peers leave.
    /// Returns true on the transition to ready.
    pub fn update_readiness(&mut self, members: usize, total_stake: u64) -> bool {
        if self.is_ready() {
            return false;
        }
        if members > 0
            && members >= self.min_quorum_members
            && total_stake >= self.min_quorum_stake
        {
            self.state = SchedulerState::Ready;
            return true;
        }
        false
    }

    /// Id the next round will get.
    pub fn next_round_id(&self) -> u64 {
        self.next_round
    }

    pub fn open_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn round(&self, id: u64) -> Option<&PollRound> {
        self.rounds.get(&id)
    }

    /// Returns true if a new round may be opened now.
    pub fn can_open(&self) -> bool {
        self.is_ready() && self.rounds.len() < self.max_inflight_rounds
    }

    /// Peers with an unanswered query in any open round.
    pub fn peers_in_flight(&self) -> HashSet<NodeId> {
        self.rounds
            .values()
            .flat_map(|round| round.outstanding().copied())
            .collect()
    }

    /// Opens a round offering `candidates` to `peers`.
    ///
    /// Returns `None` without consuming a round id if either list is
    /// empty or no round may be opened.
    pub fn open_round(
        &mut self,
        candidates: Vec<BlockHash>,
        peers: &[NodeId],
        now: Instant,
    ) -> Option<Poll> {
        if candidates.is_empty() || peers.is_empty() || !self.can_open() {
            return None;
        }
        let deadline = now.checked_add(self.query_timeout)?;

        let id = self.next_round;
        self.next_round += 1;

        self.rounds.insert(
            id,
            PollRound {
                id,
                candidates: candidates.clone(),
                issued_at: now,
                deadline,
                polled: peers.iter().copied().collect(),
                answered: HashSet::new(),
            },
        );
        self.state = SchedulerState::Polling;

        Some(Poll {
            round: id,
            candidates,
        })
    }

    /// Matches a response against its open round.
    ///
    /// The peer gets one answer per round: it is marked as answered
    /// before the votes are checked, so a malformed response also uses it
    /// up.
    pub fn accept_response(
        &mut self,
        peer: NodeId,
        response: &Response,
    ) -> Result<AcceptedResponse, ProtocolError> {
        let unexpected = ProtocolError::UnexpectedResponse {
            round: response.round,
            peer,
        };
        let round = self.rounds.get_mut(&response.round).ok_or(unexpected.clone())?;
        if !round.polled.contains(&peer) || !round.answered.insert(peer) {
            return Err(unexpected);
        }

        let candidates = round.candidates.clone();
        let completed = round.is_complete();
        if completed {
            self.close(response.round);
        }

        if response.votes.len() != candidates.len() {
            return Err(ProtocolError::InvalidResponseSize {
                expected: candidates.len(),
                actual: response.votes.len(),
            });
        }
        if let Some(index) = response
            .votes
            .iter()
            .zip(&candidates)
            .position(|(vote, hash)| vote.hash != *hash)
        {
            return Err(ProtocolError::InvalidResponseContent { index });
        }

        Ok(AcceptedResponse {
            round: response.round,
            candidates,
            completed,
        })
    }

    /// Abandons every round whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<PollRound> {
        let expired: Vec<u64> = self
            .rounds
            .values()
            .filter(|round| now >= round.deadline)
            .map(|round| round.id)
            .collect();

        let mut rounds = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(round) = self.close(id) {
                rounds.push(round);
            }
        }
        rounds
    }

    /// Abandons all open rounds. Returns how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.rounds.len();
        self.rounds.clear();
        if self.is_ready() {
            self.state = SchedulerState::Ready;
        }
        count
    }

    fn close(&mut self, id: u64) -> Option<PollRound> {
        let round = self.rounds.remove(&id);
        if self.rounds.is_empty() && self.is_ready() {
            self.state = SchedulerState::Ready;
        }
        round
    }
}
