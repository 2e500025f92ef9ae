//! Per-account send pacing.
//!
//! After a dispatch the account cools down for a delay drawn uniformly from
//! a window (default 5–15s). The draw happens on every dispatch so sends never
//! land on a fixed interval. Nothing here sleeps: the assigner simply refuses
//! to hand out work until `cooldown_until` has passed.
//!
//! Windows are capped at [`MAX_PACING_DELAY_SECS`] whatever their source.

use chrono::{DateTime, Duration, Utc};
use outreach_core::config::{MAX_PACING_DELAY_SECS, PacingConfig};
use outreach_core::types::Campaign;
use rand::Rng;

/// Inclusive delay window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Pacing {
    pub fn new(min_delay_secs: u64, max_delay_secs: u64) -> Self {
        // Tolerate an inverted pair rather than panic inside gen_range.
        let (min, max) = (min_delay_secs.min(MAX_PACING_DELAY_SECS), max_delay_secs.min(MAX_PACING_DELAY_SECS));
        Self {
            min_delay_secs: min.min(max),
            max_delay_secs: min.max(max),
        }
    }

    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(config.min_delay_secs, config.max_delay_secs)
    }

    /// The campaign's own window if it carries one, else `self`.
    pub fn for_campaign(&self, campaign: &Campaign) -> Self {
        match (campaign.min_delay_secs, campaign.max_delay_secs) {
            (Some(min), Some(max)) => Self::new(min, max),
            (Some(min), None) => Self::new(min, self.max_delay_secs.max(min)),
            (None, Some(max)) => Self::new(self.min_delay_secs.min(max), max),
            (None, None) => *self,
        }
    }

    /// The wider of two windows, used when a batch spans campaigns.
    pub fn widest(self, other: Self) -> Self {
        Self::new(
            self.min_delay_secs.max(other.min_delay_secs),
            self.max_delay_secs.max(other.max_delay_secs),
        )
    }

    /// Draw one delay from the window.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let cap_ms = MAX_PACING_DELAY_SECS * 1000;
        let to_ms = |secs: u64| secs.checked_mul(1000).map_or(cap_ms, |ms| ms.min(cap_ms));
        let (lo, hi) = (to_ms(self.min_delay_secs), to_ms(self.max_delay_secs));
        let ms = rng.gen_range(lo.min(hi)..=lo.max(hi));
        Duration::try_milliseconds(ms as i64).unwrap_or(Duration::zero())
    }

    /// Instant before which the account must not be offered another claim.
    pub fn cooldown_until<R: Rng + ?Sized>(
        &self,
        last_dispatch_at: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        last_dispatch_at
            .checked_add_signed(self.draw(rng))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from_config(&PacingConfig::default())
    }
}

/// Whether an account with the given cooldown may dispatch at `now`.
pub fn is_ready(cooldown_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    cooldown_until.is_none_or(|until| until <= now)
}
