//! Shared harness: an engine over a [`MemoryChain`] and a simulated quorum
//! whose peers answer every poll with the same vote.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use finality_crypto::PrivateKey;
use finality_engine::{
    AvalancheConfig, AvalancheEngine, ChannelTransport, MemoryChain, Poll, QuorumSet, Response,
    Vote, VoteValue,
};
use finality_ids::NodeId;
use finality_utils::logging;
use tokio::sync::mpsc;

/// A quorum peer that signs its answers.
pub struct SimulatedPeer {
    pub key: PrivateKey,
    pub node_id: NodeId,
    pub weight: u64,
}

impl SimulatedPeer {
    pub fn new(weight: u64) -> Self {
        let key = PrivateKey::generate();
        let node_id = key.public_key().node_id();
        Self {
            key,
            node_id,
            weight,
        }
    }

    pub fn answer(&self, poll: &Poll, value: VoteValue) -> Response {
        let votes = poll
            .candidates
            .iter()
            .map(|hash| Vote::new(*hash, value))
            .collect();
        Response::new(poll.round, 0, votes)
            .sign(&self.key)
            .unwrap()
    }
}

pub struct Harness {
    pub chain: Arc<MemoryChain>,
    pub engine: Arc<AvalancheEngine>,
    pub peers: Vec<SimulatedPeer>,
    pub polls: mpsc::UnboundedReceiver<(NodeId, Poll)>,
    pub start: Instant,
    pub ticks: u64,
}

/// Regtest settings with thresholds small enough to finalize in a few rounds.
pub fn test_config() -> AvalancheConfig {
    AvalancheConfig {
        confidence_threshold: 100,
        confidence_ceiling: 1_000,
        finalization_rounds: 3,
        rejection_votes: 6,
        fanout: 8,
        sampler_seed: Some(2024),
        ..AvalancheConfig::regtest()
    }
}

impl Harness {
    pub fn new(config: AvalancheConfig, peer_count: usize, weight: u64) -> Self {
        logging::try_init(&config.logging);

        let chain = Arc::new(MemoryChain::new());
        let (transport, polls) = ChannelTransport::new();
        let engine = Arc::new(
            AvalancheEngine::new(
                config,
                chain.clone(),
                chain.clone(),
                Arc::new(transport),
                Arc::new(QuorumSet::new()),
            )
            .unwrap(),
        );

        let start = Instant::now();
        let peers: Vec<SimulatedPeer> = (0..peer_count).map(|_| SimulatedPeer::new(weight)).collect();
        for peer in &peers {
            engine
                .add_peer(peer.node_id, peer.weight, peer.key.public_key(), start)
                .unwrap();
        }

        Self {
            chain,
            engine,
            peers,
            polls,
            start,
            ticks: 0,
        }
    }

    pub fn peer(&self, node_id: &NodeId) -> &SimulatedPeer {
        self.peers.iter().find(|p| p.node_id == *node_id).unwrap()
    }

    /// Runs one tick and lets every polled peer answer with `value`.
    ///
    /// Returns the number of polls answered.
    pub async fn round(&mut self, value: VoteValue) -> usize {
        let now = self.start + Duration::from_millis(self.ticks * 10);
        self.ticks += 1;
        self.engine.tick(now).await;

        let mut answered = 0;
        while let Ok((node_id, poll)) = self.polls.try_recv() {
            let response = self.peer(&node_id).answer(&poll, value);
            self.engine
                .handle_response_at(node_id, response, now)
                .unwrap();
            answered += 1;
        }
        answered
    }

    /// Runs rounds until `done` holds, up to `max_rounds`.
    pub async fn rounds_until<F>(&mut self, value: VoteValue, max_rounds: usize, done: F) -> bool
    where
        F: Fn(&AvalancheEngine) -> bool,
    {
        for _ in 0..max_rounds {
            if done(&self.engine) {
                return true;
            }
            self.round(value).await;
        }
        done(&self.engine)
    }
}
