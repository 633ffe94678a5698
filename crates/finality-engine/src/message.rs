//! Poll and response messages exchanged with quorum peers.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use finality_crypto::{PrivateKey, PublicKey, Signature};
use finality_ids::{BlockHash, NodeId, ID_LEN};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A peer's opinion on one candidate.
///
/// Serialized as its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum VoteValue {
    Accepted,
    Invalid,
    Rejected,
    /// The peer has no opinion yet, e.g. it lacks the block.
    Unknown,
}

impl VoteValue {
    pub const fn code(self) -> i32 {
        match self {
            Self::Accepted => 0,
            Self::Invalid => 1,
            Self::Rejected => 2,
            Self::Unknown => -1,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::Invalid),
            2 => Ok(Self::Rejected),
            -1 => Ok(Self::Unknown),
            other => Err(ProtocolError::UnknownVoteCode(other)),
        }
    }

    /// Rejected and Invalid count against a candidate.
    pub const fn is_adverse(self) -> bool {
        matches!(self, Self::Rejected | Self::Invalid)
    }
}

impl TryFrom<i32> for VoteValue {
    type Error = ProtocolError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<VoteValue> for i32 {
    fn from(value: VoteValue) -> Self {
        value.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub hash: BlockHash,
    pub value: VoteValue,
}

impl Vote {
    pub fn new(hash: BlockHash, value: VoteValue) -> Self {
        Self { hash, value }
    }
}

/// Outbound query: what do you think of these blocks?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub round: u64,
    /// In the order the votes must come back.
    pub candidates: Vec<BlockHash>,
}

/// A peer's answer to a [`Poll`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub round: u64,
    /// How long the peer asks not to be polled again.
    pub cooldown_ms: u32,
    pub votes: Vec<Vote>,
    pub signature: Option<Signature>,
}

impl Response {
    /// Creates an unsigned response.
    pub fn new(round: u64, cooldown_ms: u32, votes: Vec<Vote>) -> Self {
        Self {
            round,
            cooldown_ms,
            votes,
            signature: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(u64::from(self.cooldown_ms))
    }

    /// Canonical bytes covered by the signature.
    ///
    /// Fails if the vote count does not fit the 32-bit count field.
    pub fn signing_bytes(&self) -> Result<Bytes, ProtocolError> {
        let count = encoded_vote_count(self.votes.len())?;
        let mut buf = BytesMut::with_capacity(16 + self.votes.len() * (4 + ID_LEN));
        buf.put_u64(self.round);
        buf.put_u32(self.cooldown_ms);
        buf.put_u32(count);
        for vote in &self.votes {
            buf.put_i32(vote.value.code());
            buf.put_slice(vote.hash.as_bytes());
        }
        Ok(buf.freeze())
    }

    /// Signs the response with the peer's delegated key.
    pub fn sign(mut self, key: &PrivateKey) -> Result<Self, ProtocolError> {
        let bytes = self.signing_bytes()?;
        let signature = key
            .sign(&bytes)
            .map_err(|e| ProtocolError::Signing(e.to_string()))?;
        self.signature = Some(signature);
        Ok(self)
    }

    /// Checks the signature against the key `peer` registered.
    pub fn verify(&self, peer: NodeId, key: &PublicKey) -> Result<(), ProtocolError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(ProtocolError::MissingSignature(peer))?;
        key.verify(&self.signing_bytes()?, signature)
            .map_err(|_| ProtocolError::InvalidSignature(peer))
    }
}

fn encoded_vote_count(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::OversizedResponse { votes: len })
}
