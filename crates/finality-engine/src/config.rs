//! Engine configuration.
//!
//! Every threshold of the polling and decision rules lives here. Durations
//! are stored in milliseconds so the TOML form stays flat.

use std::path::Path;
use std::time::Duration;

use finality_utils::LogConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound for every duration setting, one day.
pub const MAX_DURATION_MS: u64 = 86_400_000;

/// What a Rejected or Invalid vote does to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdversePolicy {
    /// Subtract the voter's weight from confidence, clamped at zero.
    #[default]
    Decrement,
    /// Leave confidence alone but restart the consecutive-round streak.
    ResetStreak,
}

/// Configuration for the Avalanche finality engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvalancheConfig {
    /// Minimum total stake before polling starts.
    pub min_quorum_stake: u64,
    /// Minimum number of quorum members before polling starts.
    pub min_quorum_members: usize,
    /// Delay between scheduler ticks.
    pub poll_interval_ms: u64,
    /// A round not fully answered within this window is abandoned.
    pub query_timeout_ms: u64,
    /// Minimum delay before re-polling a peer that answered.
    pub peer_cooldown_ms: u64,
    /// Upper bound on the cooldown a peer may request in its response.
    pub max_response_cooldown_ms: u64,
    /// Peers not seen within this window are not sampled.
    pub liveness_window_ms: u64,
    /// Peers polled per round.
    pub fanout: usize,
    /// Candidates offered per round.
    pub max_element_poll: usize,
    /// Rounds that may be open at once.
    pub max_inflight_rounds: usize,
    /// Confidence a round must leave behind to count as successful.
    pub confidence_threshold: u64,
    /// Confidence saturates here.
    pub confidence_ceiling: u64,
    /// Consecutive successful rounds needed to finalize.
    pub finalization_rounds: u32,
    /// Consecutive adverse votes needed to reject.
    pub rejection_votes: u32,
    pub adverse_policy: AdversePolicy,
    /// Counted votes after which a candidate may be declared stale.
    pub stale_vote_threshold: u64,
    /// A candidate is stale once `accepted * factor < counted`.
    pub stale_vote_factor: u64,
    /// A peer among a candidate's last `vote_diversity_window - 1`
    /// counted voters is ignored. 1 disables the rule.
    pub vote_diversity_window: usize,
    /// Fixed sampler seed. `None` seeds from entropy.
    pub sampler_seed: Option<u64>,
    pub logging: LogConfig,
}

impl Default for AvalancheConfig {
    fn default() -> Self {
        Self {
            min_quorum_stake: 1_000_000,
            min_quorum_members: 8,
            poll_interval_ms: 10,
            query_timeout_ms: 10_000,
            peer_cooldown_ms: 100,
            max_response_cooldown_ms: 60_000,
            liveness_window_ms: 300_000,
            fanout: 8,
            max_element_poll: 16,
            max_inflight_rounds: 10,
            confidence_threshold: 128,
            confidence_ceiling: 1024,
            finalization_rounds: 4,
            rejection_votes: 16,
            adverse_policy: AdversePolicy::Decrement,
            stale_vote_threshold: 4096,
            stale_vote_factor: 64,
            vote_diversity_window: 8,
            sampler_seed: None,
            logging: LogConfig::default(),
        }
    }
}

impl AvalancheConfig {
    /// Test-network settings: no stake or member minimum, no cooldown.
    ///
    /// Never use these outside tests.
    pub fn regtest() -> Self {
        Self {
            min_quorum_stake: 0,
            min_quorum_members: 0,
            peer_cooldown_ms: 0,
            query_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            }
        }

        for (field, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("query_timeout_ms", self.query_timeout_ms),
            ("max_response_cooldown_ms", self.max_response_cooldown_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(invalid(field, "must be at most one day"));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be positive"));
        }
        if self.query_timeout_ms == 0 {
            return Err(invalid("query_timeout_ms", "must be positive"));
        }
        if self.fanout == 0 {
            return Err(invalid("fanout", "must be positive"));
        }
        if self.max_element_poll == 0 {
            return Err(invalid("max_element_poll", "must be positive"));
        }
        if self.max_inflight_rounds == 0 {
            return Err(invalid("max_inflight_rounds", "must be positive"));
        }
        if self.confidence_threshold == 0 {
            return Err(invalid("confidence_threshold", "must be positive"));
        }
        if self.confidence_ceiling < self.confidence_threshold {
            return Err(invalid(
                "confidence_ceiling",
                "must be >= confidence_threshold",
            ));
        }
        if self.finalization_rounds == 0 {
            return Err(invalid("finalization_rounds", "must be positive"));
        }
        if self.rejection_votes == 0 {
            return Err(invalid("rejection_votes", "must be positive"));
        }
        if self.stale_vote_factor == 0 {
            return Err(invalid("stale_vote_factor", "must be positive"));
        }
        if self.vote_diversity_window == 0 {
            return Err(invalid("vote_diversity_window", "must be positive"));
        }
        if self.max_response_cooldown_ms < self.peer_cooldown_ms {
            return Err(invalid(
                "max_response_cooldown_ms",
                "must be >= peer_cooldown_ms",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn peer_cooldown(&self) -> Duration {
        Duration::from_millis(self.peer_cooldown_ms)
    }

    pub fn max_response_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_response_cooldown_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }
}
