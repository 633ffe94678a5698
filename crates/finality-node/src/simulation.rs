//! A local network simulation: the engine over an in-memory chain, polled
//! against signing peers that accept every candidate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use finality_crypto::PrivateKey;
use finality_engine::{
    AvalancheConfig, AvalancheEngine, ChannelTransport, ConfigError, MemoryChain, Poll,
    ProtocolError, QuorumError, QuorumSet, Response, Vote, VoteValue,
};
use finality_ids::{BlockHash, NodeId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Quorum(#[from] QuorumError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

struct Peer {
    key: PrivateKey,
    node_id: NodeId,
}

impl Peer {
    fn answer(&self, poll: &Poll) -> Result<Response, ProtocolError> {
        let votes = poll
            .candidates
            .iter()
            .map(|hash| Vote::new(*hash, VoteValue::Accepted))
            .collect();
        Response::new(poll.round, 0, votes).sign(&self.key)
    }
}

/// Outcome of [`Simulation::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub mined: usize,
    pub finalized: usize,
    pub rounds: usize,
}

pub struct Simulation {
    chain: Arc<MemoryChain>,
    engine: Arc<AvalancheEngine>,
    peers: Vec<Peer>,
    polls: mpsc::UnboundedReceiver<(NodeId, Poll)>,
    start: Instant,
    step: Duration,
    ticks: u32,
}

impl Simulation {
    pub fn new(config: AvalancheConfig, peers: usize, weight: u64) -> Result<Self, SimulationError> {
        let chain = Arc::new(MemoryChain::new());
        let (transport, polls) = ChannelTransport::new();
        let step = config.poll_interval().max(Duration::from_millis(1));
        let engine = Arc::new(AvalancheEngine::new(
            config,
            chain.clone(),
            chain.clone(),
            Arc::new(transport),
            Arc::new(QuorumSet::new()),
        )?);

        let start = Instant::now();
        let peers: Vec<Peer> = (0..peers)
            .map(|_| {
                let key = PrivateKey::generate();
                let node_id = key.public_key().node_id();
                Peer { key, node_id }
            })
            .collect();
        for peer in &peers {
            engine.add_peer(peer.node_id, weight, peer.key.public_key(), start)?;
        }

        Ok(Self {
            chain,
            engine,
            peers,
            polls,
            start,
            step,
            ticks: 0,
        })
    }

    pub fn engine(&self) -> &Arc<AvalancheEngine> {
        &self.engine
    }

    /// Mines `blocks` blocks one at a time, polling each until it is final
    /// or `max_rounds` rounds have passed.
    pub async fn run(&mut self, blocks: usize, max_rounds: usize) -> Result<Report, SimulationError> {
        let mut report = Report {
            mined: 0,
            finalized: 0,
            rounds: 0,
        };
        if !self.engine.ready_to_poll() {
            warn!(
                peers = self.peers.len(),
                "Quorum below the configured minimum, nothing will finalize"
            );
        }

        for _ in 0..blocks {
            let block = self.chain.mine(&[]);
            report.mined += 1;

            let mut rounds = 0;
            while rounds < max_rounds && !self.is_final(&block) {
                self.round().await?;
                rounds += 1;
            }
            report.rounds += rounds;

            if self.is_final(&block) {
                report.finalized += 1;
                info!(rounds, height = self.chain.height(), "Block {} final", block);
            } else {
                warn!(rounds, "Block {} still tentative", block);
            }
        }
        Ok(report)
    }

    fn is_final(&self, block: &BlockHash) -> bool {
        self.engine.is_final_block(block).unwrap_or(false)
    }

    async fn round(&mut self) -> Result<(), SimulationError> {
        let now = self.start + self.step * self.ticks;
        self.ticks = self.ticks.saturating_add(1);
        self.engine.tick(now).await;

        while let Ok((node_id, poll)) = self.polls.try_recv() {
            let Some(peer) = self.peers.iter().find(|p| p.node_id == node_id) else {
                continue;
            };
            let response = peer.answer(&poll)?;
            if let Err(e) = self.engine.handle_response_at(node_id, response, now) {
                debug!(%node_id, "Response dropped: {}", e);
            }
        }
        Ok(())
    }
}
