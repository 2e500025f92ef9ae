//! Tunables shared by the assigner, reconciler and sweeper.

use chrono::Duration;
use outreach_core::config::{ClaimConfig, MAX_WAIT_SECS, OutreachConfig};

use crate::pacing::Pacing;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub pacing: Pacing,
    pub retry: RetryPolicy,
    pub claims: ClaimConfig,
}

impl DispatchPolicy {
    pub fn from_config(config: &OutreachConfig) -> Self {
        Self {
            pacing: Pacing::from_config(&config.pacing),
            retry: RetryPolicy::from_config(&config.retry),
            claims: config.claims.clone(),
        }
    }

    /// Requested batch size clamped to `[1, max_batch_size]`.
    pub fn batch_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.claims.default_batch_size)
            .clamp(1, self.claims.max_batch_size.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::seconds(self.claims.stale_after_secs.min(MAX_WAIT_SECS) as i64)
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&OutreachConfig::default())
    }
}
