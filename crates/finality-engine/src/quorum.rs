//! Quorum membership.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use finality_crypto::PublicKey;
use finality_ids::NodeId;
use parking_lot::RwLock;

use crate::error::QuorumError;

/// A peer eligible to vote.
#[derive(Debug, Clone)]
pub struct QuorumMember {
    pub node_id: NodeId,
    /// Stake weight
    pub weight: u64,
    /// Key the peer signs its responses with.
    pub public_key: PublicKey,
    pub last_seen: Instant,
    pub last_polled: Option<Instant>,
    /// Not polled again before this instant.
    pub cooldown_until: Option<Instant>,
}

impl QuorumMember {
    /// Creates a member seen at `now`.
    pub fn new(node_id: NodeId, weight: u64, public_key: PublicKey, now: Instant) -> Self {
        Self {
            node_id,
            weight,
            public_key,
            last_seen: now,
            last_polled: None,
            cooldown_until: None,
        }
    }

    /// Returns true if the member may be sampled at `now`.
    pub fn is_eligible(&self, now: Instant, liveness_window: Duration) -> bool {
        let live = now.saturating_duration_since(self.last_seen) <= liveness_window;
        let cooled = self.cooldown_until.map_or(true, |until| now >= until);
        live && cooled
    }
}

/// The set of quorum members, keyed by node id.
///
/// Shared between the engine and the node's peer manager.
#[derive(Debug, Default)]
pub struct QuorumSet {
    members: RwLock<HashMap<NodeId, QuorumMember>>,
    total_weight: RwLock<u64>,
}

impl QuorumSet {
    /// Creates a new empty quorum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member.
    pub fn add(&self, member: QuorumMember) -> Result<(), QuorumError> {
        let mut members = self.members.write();
        let mut total = self.total_weight.write();

        if members.contains_key(&member.node_id) {
            return Err(QuorumError::AlreadyMember(member.node_id));
        }

        *total = total.saturating_add(member.weight);
        members.insert(member.node_id, member);
        Ok(())
    }

    /// Removes a member.
    pub fn remove(&self, node_id: &NodeId) -> Result<QuorumMember, QuorumError> {
        let mut members = self.members.write();
        let mut total = self.total_weight.write();

        let member = members
            .remove(node_id)
            .ok_or(QuorumError::NotMember(*node_id))?;
        *total = total.saturating_sub(member.weight);
        Ok(member)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<QuorumMember> {
        self.members.read().get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.members.read().contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Returns the total stake weight.
    pub fn total_weight(&self) -> u64 {
        *self.total_weight.read()
    }

    /// Gets the weight of a member, zero for strangers.
    pub fn weight(&self, node_id: &NodeId) -> u64 {
        self.members
            .read()
            .get(node_id)
            .map(|m| m.weight)
            .unwrap_or(0)
    }

    pub fn members(&self) -> Vec<QuorumMember> {
        self.members.read().values().cloned().collect()
    }

    /// Records that the peer was heard from.
    pub fn touch(&self, node_id: &NodeId, now: Instant) -> bool {
        match self.members.write().get_mut(node_id) {
            Some(member) => {
                member.last_seen = member.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    pub fn mark_polled(&self, node_ids: &[NodeId], now: Instant) {
        let mut members = self.members.write();
        for node_id in node_ids {
            if let Some(member) = members.get_mut(node_id) {
                member.last_polled = Some(now);
            }
        }
    }

    /// Keeps the peer out of sampling until `until`.
    pub fn set_cooldown(&self, node_id: &NodeId, until: Instant) {
        if let Some(member) = self.members.write().get_mut(node_id) {
            member.cooldown_until = Some(until);
        }
    }

    /// Members that are live and outside their cooldown.
    pub fn eligible(&self, now: Instant, liveness_window: Duration) -> Vec<QuorumMember> {
        self.members
            .read()
            .values()
            .filter(|m| m.is_eligible(now, liveness_window))
            .cloned()
            .collect()
    }
}
