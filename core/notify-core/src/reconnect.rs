use std::cmp;
use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Linear reconnect backoff with a cap, owned by the transport.
///
/// Attempt `n` waits `step * n`, never more than `max_delay`, plus up to
/// `jitter` of random spread so a fleet of sellers does not reconnect in
/// lockstep after a relay restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub step: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            step: Duration::from_millis(config.step_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic part of the delay before attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let backoff = self.step.saturating_mul(attempt.max(1));
        cmp::min(backoff, self.max_delay)
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        base + Duration::from_millis(extra)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}
