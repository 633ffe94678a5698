//! The Avalanche finality engine.
//!
//! Ties the pieces together: chain tips are registered as candidates, the
//! scheduler opens poll rounds to peers picked by the sampler, responses
//! feed the tally, and decided candidates land in the ledger.
//!
//! All tally and scheduler mutation happens behind one mutex. Queries
//! never take it: they read the ledger and an [`ArcSwap`] snapshot of the
//! quorum status.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use finality_crypto::PublicKey;
use finality_ids::{BlockHash, NodeId, TxId};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::chain::{BlockHeader, ChainState, TransactionIndex};
use crate::config::AvalancheConfig;
use crate::error::{ConfigError, FinalityError, ProtocolError, QuorumError, Result};
use crate::ledger::{FinalityLedger, FinalizationEvent};
use crate::message::{Poll, Response};
use crate::quorum::{QuorumMember, QuorumSet};
use crate::sampler::PeerSampler;
use crate::scheduler::{PollScheduler, SchedulerState};
use crate::tally::{DecisionRule, VoteOutcome, VoteTally};
use crate::transport::PollTransport;
use crate::vote_record::Candidate;

/// Diagnostics snapshot, replaced after every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumInfo {
    pub members: usize,
    pub total_stake: u64,
    pub ready: bool,
    pub state: SchedulerState,
    pub active_candidates: usize,
    pub open_rounds: usize,
}

impl QuorumInfo {
    fn initial() -> Self {
        Self {
            members: 0,
            total_stake: 0,
            ready: false,
            state: SchedulerState::NotReady,
            active_candidates: 0,
            open_rounds: 0,
        }
    }
}

/// What happened to a candidate because of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteUpdate {
    pub hash: BlockHash,
    pub outcome: VoteOutcome,
}

#[derive(Debug)]
struct EngineCore {
    scheduler: PollScheduler,
    tally: VoteTally,
    sampler: PeerSampler,
}

/// Polls the quorum and answers finality queries.
pub struct AvalancheEngine {
    config: AvalancheConfig,
    chain: Arc<dyn ChainState>,
    quorum: Arc<QuorumSet>,
    transport: Arc<dyn PollTransport>,
    ledger: FinalityLedger,
    core: Mutex<EngineCore>,
    status: ArcSwap<QuorumInfo>,
}

impl std::fmt::Debug for AvalancheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvalancheEngine")
            .field("status", &**self.status.load())
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl AvalancheEngine {
    /// Creates an engine. Fails if the configuration is invalid.
    pub fn new(
        config: AvalancheConfig,
        chain: Arc<dyn ChainState>,
        index: Arc<dyn TransactionIndex>,
        transport: Arc<dyn PollTransport>,
        quorum: Arc<QuorumSet>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let core = EngineCore {
            scheduler: PollScheduler::new(&config),
            tally: VoteTally::new(DecisionRule::from(&config)),
            sampler: PeerSampler::new(config.sampler_seed),
        };
        let engine = Self {
            ledger: FinalityLedger::new(chain.clone(), index),
            config,
            chain,
            quorum,
            transport,
            core: Mutex::new(core),
            status: ArcSwap::from_pointee(QuorumInfo::initial()),
        };
        engine.refresh_readiness();
        Ok(engine)
    }

    pub fn config(&self) -> &AvalancheConfig {
        &self.config
    }

    pub fn quorum(&self) -> &Arc<QuorumSet> {
        &self.quorum
    }

    pub fn ledger(&self) -> &FinalityLedger {
        &self.ledger
    }

    /// Subscribes to finalization events.
    pub fn subscribe(&self) -> broadcast::Receiver<FinalizationEvent> {
        self.ledger.subscribe()
    }

    /// Returns true once the quorum minimums have been met.
    pub fn ready_to_poll(&self) -> bool {
        self.status.load().ready
    }

    pub fn quorum_info(&self) -> QuorumInfo {
        **self.status.load()
    }

    /// Is the block final?
    pub fn is_final_block(&self, hash: &BlockHash) -> Result<bool> {
        self.require_ready()?;
        self.ledger.is_final_block(hash)
    }

    /// Is the transaction final, optionally within a given block?
    pub fn is_final_transaction(&self, txid: &TxId, block: Option<&BlockHash>) -> Result<bool> {
        self.require_ready()?;
        self.ledger.is_final_transaction(txid, block)
    }

    pub fn add_peer(
        &self,
        node_id: NodeId,
        weight: u64,
        public_key: PublicKey,
        now: Instant,
    ) -> std::result::Result<(), QuorumError> {
        self.quorum
            .add(QuorumMember::new(node_id, weight, public_key, now))?;
        debug!(%node_id, weight, "Added quorum peer");
        self.refresh_readiness();
        Ok(())
    }

    pub fn remove_peer(&self, node_id: &NodeId) -> std::result::Result<QuorumMember, QuorumError> {
        let member = self.quorum.remove(node_id)?;
        debug!(%node_id, "Removed quorum peer");
        self.refresh_readiness();
        Ok(member)
    }

    /// Records that the peer was heard from.
    pub fn touch_peer(&self, node_id: &NodeId, now: Instant) -> bool {
        self.quorum.touch(node_id, now)
    }

    /// Registers a block as a candidate.
    ///
    /// Returns false if the block is already final, already a candidate,
    /// rejected, builds on a rejected block, or has no data yet.
    pub fn register_block(&self, hash: &BlockHash, now: Instant) -> Result<bool> {
        let header = self
            .chain
            .block(hash)
            .ok_or(FinalityError::BlockNotFound(*hash))?;
        if !header.has_data || self.ledger.is_final(hash) {
            return Ok(false);
        }

        let mut core = self.core.lock();
        if self.builds_on_rejected(&core.tally, &header) {
            return Ok(false);
        }
        let next_round = core.scheduler.next_round_id();
        let registered = core
            .tally
            .register(Candidate::from_header(&header, now), next_round);
        if registered {
            debug!(height = header.height, "Registered candidate {}", hash);
            self.publish_status(&core);
        }
        Ok(registered)
    }

    /// Runs one scheduler iteration.
    ///
    /// Returns the poll sent, if a round was opened.
    pub async fn tick(&self, now: Instant) -> Option<Poll> {
        let (poll, peers) = {
            let mut core = self.core.lock();
            let core = &mut *core;

            for round in core.scheduler.expire(now) {
                debug!(
                    round = round.id,
                    unanswered = round.outstanding().count(),
                    "Poll round timed out"
                );
            }

            if core
                .scheduler
                .update_readiness(self.quorum.len(), self.quorum.total_weight())
            {
                info!(
                    members = self.quorum.len(),
                    stake = self.quorum.total_weight(),
                    "Avalanche quorum established"
                );
            }
            if !core.scheduler.is_ready() {
                self.publish_status(core);
                return None;
            }

            self.sync_candidates(core, now);

            let mut opened = None;
            if core.scheduler.can_open() {
                let candidates = core.tally.candidates_by_height(self.config.max_element_poll);
                if !candidates.is_empty() {
                    let exclude = core.scheduler.peers_in_flight();
                    let peers = core.sampler.sample(
                        &self.quorum,
                        self.config.fanout,
                        &exclude,
                        now,
                        self.config.liveness_window(),
                    );
                    if let Some(poll) = core.scheduler.open_round(candidates, &peers, now) {
                        debug!(
                            round = poll.round,
                            candidates = poll.candidates.len(),
                            peers = peers.len(),
                            "Opened poll round"
                        );
                        opened = Some((poll, peers));
                    }
                }
            }

            self.publish_status(core);
            match opened {
                Some(opened) => opened,
                None => return None,
            }
        };

        for peer in &peers {
            if let Err(e) = self.transport.send_poll(*peer, poll.clone()).await {
                warn!(%peer, round = poll.round, "Failed to send poll: {}", e);
            }
        }
        Some(poll)
    }

    /// Registers the chain tip and drops candidates that left the active
    /// chain.
    fn sync_candidates(&self, core: &mut EngineCore, now: Instant) {
        let orphaned = core.tally.drop_where(|record| !self.chain.is_active(&record.hash()));
        for hash in &orphaned {
            debug!("Dropped orphaned candidate {}", hash);
        }
        let revived: Vec<BlockHash> = core
            .tally
            .rejected()
            .iter()
            .filter(|hash| !self.chain.is_active(hash))
            .copied()
            .collect();
        for hash in &revived {
            core.tally.forget_rejected(hash);
        }
        if !core.tally.rejected().is_empty() {
            let tainted: Vec<BlockHash> = core
                .tally
                .hashes()
                .into_iter()
                .filter(|hash| {
                    self.chain
                        .block(hash)
                        .map_or(false, |header| self.builds_on_rejected(&core.tally, &header))
                })
                .collect();
            for hash in &tainted {
                core.tally.remove(hash);
                debug!("Dropped candidate {} building on a rejected block", hash);
            }
        }

        let Some(tip) = self.chain.tip() else {
            return;
        };
        if !tip.has_data || self.ledger.is_final(&tip.hash) {
            return;
        }
        if self
            .ledger
            .finalized_tip()
            .map_or(false, |finalized| tip.height <= finalized.height)
        {
            return;
        }
        if self.builds_on_rejected(&core.tally, &tip) {
            return;
        }
        let next_round = core.scheduler.next_round_id();
        if core
            .tally
            .register(Candidate::from_header(&tip, now), next_round)
        {
            debug!(height = tip.height, "Registered chain tip {}", tip.hash);
        }
    }

    /// Applies a response received now.
    pub fn handle_response(
        &self,
        peer: NodeId,
        response: Response,
    ) -> std::result::Result<Vec<VoteUpdate>, ProtocolError> {
        self.handle_response_at(peer, response, tokio::time::Instant::now().into_std())
    }

    /// Applies a response from `peer` received at `now`.
    ///
    /// Rejected responses leave the tally untouched.
    pub fn handle_response_at(
        &self,
        peer: NodeId,
        response: Response,
        now: Instant,
    ) -> std::result::Result<Vec<VoteUpdate>, ProtocolError> {
        let member = self
            .quorum
            .get(&peer)
            .ok_or(ProtocolError::UnknownPeer(peer))?;
        response.verify(peer, &member.public_key)?;

        let mut core = self.core.lock();
        let accepted = core.scheduler.accept_response(peer, &response)?;
        self.quorum.touch(&peer, now);

        let cooldown = response
            .cooldown()
            .max(self.config.peer_cooldown())
            .min(self.config.max_response_cooldown());
        if let Some(until) = now.checked_add(cooldown) {
            self.quorum.set_cooldown(&peer, until);
        }

        let mut updates = Vec::new();
        for vote in &response.votes {
            if !self.chain.is_active(&vote.hash) {
                continue;
            }
            let Some(outcome) = core.tally.record_vote(
                &vote.hash,
                accepted.round,
                peer,
                vote.value,
                member.weight,
            ) else {
                continue;
            };

            let outcome = match outcome {
                VoteOutcome::Finalized => {
                    let newly = self.ledger.mark_final(&vote.hash, core.tally.rejected());
                    if newly.is_empty() && !self.ledger.is_final(&vote.hash) {
                        // Builds on a rejected block.
                        core.tally.reject(vote.hash);
                        VoteOutcome::Rejected
                    } else {
                        VoteOutcome::Finalized
                    }
                }
                VoteOutcome::Rejected => {
                    info!("Avalanche rejected block {}", vote.hash);
                    VoteOutcome::Rejected
                }
                VoteOutcome::Stale => {
                    debug!("Dropped stale candidate {}", vote.hash);
                    VoteOutcome::Stale
                }
                VoteOutcome::Pending => VoteOutcome::Pending,
            };
            updates.push(VoteUpdate {
                hash: vote.hash,
                outcome,
            });
        }

        if updates
            .iter()
            .any(|update| update.outcome == VoteOutcome::Finalized)
        {
            if let Some(finalized) = self.ledger.finalized_tip() {
                // Final ancestors and blocks competing with the final chain.
                let dropped = core
                    .tally
                    .drop_where(|record| record.height() <= finalized.height);
                if !dropped.is_empty() {
                    debug!(count = dropped.len(), "Dropped candidates below finalized tip");
                }
            }
        }

        self.publish_status(&core);
        Ok(updates)
    }

    /// Drives the engine until `shutdown` fires.
    ///
    /// Ticks every poll interval and applies responses as they arrive.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<(NodeId, Response)>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Avalanche finality engine started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Avalanche finality engine shutting down");
                    break;
                }

                Some((peer, response)) = inbound.recv() => {
                    let round = response.round;
                    if let Err(e) = self.handle_response(peer, response) {
                        debug!(%peer, round, "Dropped poll response: {}", e);
                    }
                }

                _ = interval.tick() => {
                    self.tick(tokio::time::Instant::now().into_std()).await;
                }
            }
        }

        self.shutdown();
    }

    /// Abandons all open rounds. Late responses are discarded.
    pub fn shutdown(&self) {
        let mut core = self.core.lock();
        let cancelled = core.scheduler.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled open poll rounds");
        }
        self.publish_status(&core);
    }

    /// Number of candidates under vote.
    pub fn active_candidates(&self) -> usize {
        self.core.lock().tally.len()
    }

    /// Returns true if the block is currently a candidate.
    pub fn is_candidate(&self, hash: &BlockHash) -> bool {
        self.core.lock().tally.contains(hash)
    }

    /// Returns true if `header` or one of its ancestors above the
    /// finalized tip was rejected.
    fn builds_on_rejected(&self, tally: &VoteTally, header: &BlockHeader) -> bool {
        if tally.rejected().is_empty() {
            return false;
        }
        let floor = self.ledger.finalized_tip().map(|tip| tip.height);
        let mut current = Some(*header);
        while let Some(block) = current {
            if floor.map_or(false, |height| block.height <= height) {
                return false;
            }
            if tally.is_rejected(&block.hash) {
                return true;
            }
            if block.is_genesis() {
                return false;
            }
            current = self.chain.block(&block.parent);
        }
        false
    }

    fn refresh_readiness(&self) {
        let mut core = self.core.lock();
        if core
            .scheduler
            .update_readiness(self.quorum.len(), self.quorum.total_weight())
        {
            info!(
                members = self.quorum.len(),
                stake = self.quorum.total_weight(),
                "Avalanche quorum established"
            );
        }
        self.publish_status(&core);
    }

    fn publish_status(&self, core: &EngineCore) {
        self.status.store(Arc::new(QuorumInfo {
            members: self.quorum.len(),
            total_stake: self.quorum.total_weight(),
            ready: core.scheduler.is_ready(),
            state: core.scheduler.state(),
            active_candidates: core.tally.len(),
            open_rounds: core.scheduler.open_rounds(),
        }));
    }

    fn require_ready(&self) -> Result<()> {
        if self.ready_to_poll() {
            Ok(())
        } else {
            Err(FinalityError::NotReady)
        }
    }
}
