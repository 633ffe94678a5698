//! Avalanche post-consensus finality.
//!
//! A node polls a stake-weighted quorum of peers about its chain tip,
//! tallies their signed votes, and promotes blocks (and with them every
//! ancestor and contained transaction) from tentative to final once
//! confidence has held above a threshold for enough consecutive rounds.
//!
//! # Architecture
//!
//! - **VoteRecord**: per-candidate tally state
//! - **PeerSampler**: weighted choice of the peers polled in a round
//! - **PollScheduler**: readiness, round ids, open rounds and timeouts
//! - **VoteTally**: the finalization decision rule
//! - **FinalityLedger**: finalized blocks and the finality queries
//! - **AvalancheEngine**: orchestration and the query surface
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use finality_engine::{AvalancheConfig, AvalancheEngine, ChannelTransport, MemoryChain, QuorumSet};
//!
//! let chain = Arc::new(MemoryChain::new());
//! let (transport, _polls) = ChannelTransport::new();
//! let engine = AvalancheEngine::new(
//!     AvalancheConfig::regtest(),
//!     chain.clone(),
//!     chain.clone(),
//!     Arc::new(transport),
//!     Arc::new(QuorumSet::new()),
//! )
//! .unwrap();
//!
//! assert!(!engine.ready_to_poll());
//! assert!(engine.is_final_block(&chain.genesis()).is_err());
//! ```

pub mod chain;
pub mod config;
mod engine;
mod error;
pub mod ledger;
pub mod memory;
pub mod message;
pub mod quorum;
pub mod sampler;
pub mod scheduler;
pub mod tally;
pub mod transport;
pub mod vote_record;

pub use chain::{BlockHeader, ChainState, IndexState, TransactionIndex, TxLocation};
pub use config::{AdversePolicy, AvalancheConfig};
pub use engine::{AvalancheEngine, QuorumInfo, VoteUpdate};
pub use error::{
    ConfigError, ErrorKind, FinalityError, ProtocolError, QuorumError, Result, TransportError,
};
pub use ledger::{FinalityLedger, FinalityRecord, FinalizationEvent};
pub use memory::MemoryChain;
pub use message::{Poll, Response, Vote, VoteValue};
pub use quorum::{QuorumMember, QuorumSet};
pub use sampler::PeerSampler;
pub use scheduler::{PollRound, PollScheduler, SchedulerState};
pub use tally::{DecisionRule, VoteOutcome, VoteTally};
pub use transport::{ChannelTransport, PollTransport};
pub use vote_record::{Candidate, VoteRecord};
