//! Weighted peer sampling.
//!
//! Uses the Efraimidis-Spirakis method: every eligible peer draws a key
//! `ln(u) / w` for a uniform `u` and the `fanout` largest keys win. This
//! samples without replacement with inclusion odds growing with `w`.
//!
//! A peer's weight is its stake (at least 1) scaled by how long ago it
//! was last polled, so quiet peers are favoured.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use finality_ids::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::quorum::{QuorumMember, QuorumSet};

/// Longest idle time that still increases a peer's weight.
const MAX_AGE_BONUS: Duration = Duration::from_secs(10);

/// Picks the peers polled in a round.
#[derive(Debug)]
pub struct PeerSampler {
    rng: StdRng,
}

impl PeerSampler {
    /// Creates a sampler. A fixed seed makes the draws reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Samples up to `fanout` distinct live peers not in `exclude`.
    ///
    /// Each selected peer's last-polled instant is set to `now`. An empty
    /// or fully excluded quorum yields an empty sample.
    pub fn sample(
        &mut self,
        quorum: &QuorumSet,
        fanout: usize,
        exclude: &HashSet<NodeId>,
        now: Instant,
        liveness_window: Duration,
    ) -> Vec<NodeId> {
        if fanout == 0 {
            return Vec::new();
        }

        let mut eligible: Vec<QuorumMember> = quorum
            .eligible(now, liveness_window)
            .into_iter()
            .filter(|m| !exclude.contains(&m.node_id))
            .collect();
        // Map order is random; fix it so a seeded sampler repeats itself.
        eligible.sort_by_key(|m| m.node_id);

        let mut keyed: Vec<(f64, NodeId)> = eligible
            .iter()
            .map(|m| {
                let weight = sampling_weight(m, now);
                // u in (0, 1] so ln(u) is finite
                let u: f64 = 1.0 - self.rng.gen::<f64>();
                (u.ln() / weight, m.node_id)
            })
            .collect();

        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        let sampled: Vec<NodeId> = keyed
            .into_iter()
            .take(fanout)
            .map(|(_, node_id)| node_id)
            .collect();

        quorum.mark_polled(&sampled, now);
        sampled
    }
}

fn sampling_weight(member: &QuorumMember, now: Instant) -> f64 {
    let idle = member
        .last_polled
        .map_or(MAX_AGE_BONUS, |at| now.saturating_duration_since(at))
        .min(MAX_AGE_BONUS);
    let bonus = 1.0 + idle.as_secs_f64();
    member.weight.max(1) as f64 * bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use finality_crypto::PrivateKey;

    const WINDOW: Duration = Duration::from_secs(300);

    fn quorum_of(weights: &[u64], now: Instant) -> QuorumSet {
        let quorum = QuorumSet::new();
        for (i, weight) in weights.iter().enumerate() {
            let key = PrivateKey::generate().public_key();
            quorum
                .add(QuorumMember::new(
                    NodeId::from_bytes([i as u8 + 1; 20]),
                    *weight,
                    key,
                    now,
                ))
                .unwrap();
        }
        quorum
    }

    #[test]
    fn test_empty_quorum() {
        let mut sampler = PeerSampler::new(Some(1));
        let quorum = QuorumSet::new();
        let sample = sampler.sample(&quorum, 8, &HashSet::new(), Instant::now(), WINDOW);
        assert!(sample.is_empty());
    }

    #[test]
    fn test_sample_bounded_and_distinct() {
        let now = Instant::now();
        let quorum = quorum_of(&[10; 20], now);
        let mut sampler = PeerSampler::new(Some(7));

        let sample = sampler.sample(&quorum, 8, &HashSet::new(), now, WINDOW);
        assert_eq!(sample.len(), 8);
        let unique: HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 8);

        // Fanout larger than the quorum returns everyone once
        let sample = sampler.sample(&quorum, 50, &HashSet::new(), now, WINDOW);
        assert_eq!(sample.len(), 20);
    }

    #[test]
    fn test_excluded_peers_skipped() {
        let now = Instant::now();
        let quorum = quorum_of(&[1, 1, 1], now);
        let mut sampler = PeerSampler::new(Some(3));

        let exclude: HashSet<NodeId> = [NodeId::from_bytes([1; 20]), NodeId::from_bytes([2; 20])]
            .into_iter()
            .collect();
        let sample = sampler.sample(&quorum, 3, &exclude, now, WINDOW);
        assert_eq!(sample, vec![NodeId::from_bytes([3; 20])]);
    }

    #[test]
    fn test_marks_last_polled() {
        let now = Instant::now();
        let quorum = quorum_of(&[5, 5], now);
        let mut sampler = PeerSampler::new(Some(11));

        let sample = sampler.sample(&quorum, 1, &HashSet::new(), now, WINDOW);
        assert_eq!(sample.len(), 1);
        let polled = quorum.get(&sample[0]).unwrap();
        assert_eq!(polled.last_polled, Some(now));
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let now = Instant::now();
        let a = quorum_of(&[1, 2, 3, 4, 5, 6, 7, 8], now);
        let b = quorum_of(&[1, 2, 3, 4, 5, 6, 7, 8], now);

        let first = PeerSampler::new(Some(99)).sample(&a, 4, &HashSet::new(), now, WINDOW);
        let second = PeerSampler::new(Some(99)).sample(&b, 4, &HashSet::new(), now, WINDOW);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stake_biases_selection() {
        let now = Instant::now();
        let quorum = quorum_of(&[1_000, 1, 1, 1, 1, 1, 1, 1, 1, 1], now);
        let heavy = NodeId::from_bytes([1; 20]);
        let mut sampler = PeerSampler::new(Some(5));

        let later = now + Duration::from_secs(60);
        let hits = (0..200)
            .filter(|_| {
                sampler
                    .sample(&quorum, 1, &HashSet::new(), later, WINDOW)
                    .contains(&heavy)
            })
            .count();
        assert!(hits > 150, "heavy peer picked {hits} times out of 200");
    }
}
