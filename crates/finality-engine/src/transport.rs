//! Outbound poll delivery.

use async_trait::async_trait;
use finality_ids::NodeId;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::Poll;

/// Delivers polls to quorum peers.
///
/// Responses come back separately, through the channel handed to
/// [`AvalancheEngine::run`](crate::AvalancheEngine::run).
#[async_trait]
pub trait PollTransport: Send + Sync {
    async fn send_poll(&self, peer: NodeId, poll: Poll) -> Result<(), TransportError>;
}

/// Transport that forwards every poll into an mpsc channel.
///
/// Simulated peers read the other end and answer with responses.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(NodeId, Poll)>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(NodeId, Poll)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PollTransport for ChannelTransport {
    async fn send_poll(&self, peer: NodeId, poll: Poll) -> Result<(), TransportError> {
        self.tx
            .send((peer, poll))
            .map_err(|_| TransportError::Closed)
    }
}
