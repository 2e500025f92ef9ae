//! Retry policy — failure classification and exponential backoff.

use chrono::{DateTime, Duration, Utc};
use outreach_core::config::{MAX_WAIT_SECS, RetryConfig};
use serde::{Deserialize, Serialize};

/// Reason recorded when a claim expires without a report.
pub const CLAIM_EXPIRED: &str = "claim expired";

/// How a reported failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network errors, timeouts and platform rate limits.
    Transient,
    /// The recipient cannot be reached (blocked sender, invalid target).
    TerminalTarget,
    /// The sending account itself is unusable (banned, suspended).
    TerminalAccount,
}

impl FailureClass {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FailureClass::Transient)
    }
}

const TARGET_MARKERS: &[&str] = &[
    "blocked",
    "invalid_recipient",
    "invalid recipient",
    "invalid_target",
    "user_not_found",
    "user not found",
    "not_found",
    "privacy",
    "cannot_message",
    "cannot message",
];

const ACCOUNT_MARKERS: &[&str] = &[
    "account_banned",
    "account banned",
    "banned",
    "suspended",
    "account_locked",
    "checkpoint",
];

/// Classify a worker-supplied failure reason.
///
/// Unknown reasons are transient: a retry costs one delayed attempt, while a
/// wrong terminal verdict loses the recipient for good.
pub fn classify(reason: &str) -> FailureClass {
    let reason = reason.trim().to_ascii_lowercase();
    if ACCOUNT_MARKERS.iter().any(|m| reason.contains(m)) {
        FailureClass::TerminalAccount
    } else if TARGET_MARKERS.iter().any(|m| reason.contains(m)) {
        FailureClass::TerminalTarget
    } else {
        FailureClass::Transient
    }
}

/// What to do with a recipient after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending, eligible again at `next_action_at`.
    Retry { next_action_at: DateTime<Utc> },
    /// Permanently failed.
    GiveUp,
}

/// Attempt ceiling plus exponential backoff: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff_secs: config.base_backoff_secs,
            max_backoff_secs: config.max_backoff_secs.max(config.base_backoff_secs),
        }
    }

    /// Delay applied after the `attempt`-th failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let secs = self
            .base_backoff_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_secs)
            .min(MAX_WAIT_SECS);
        Duration::seconds(secs as i64)
    }

    /// Decide the fate of a recipient whose `attempt_count`-th attempt failed.
    pub fn decide(&self, attempt_count: u32, class: FailureClass, now: DateTime<Utc>) -> RetryDecision {
        if class.is_terminal() || attempt_count >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                next_action_at: now + self.backoff(attempt_count),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
