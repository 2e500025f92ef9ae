//! Recipient and campaign state machines.
//!
//! The tables here are the single source of truth for which status changes
//! are legal. The store turns them into `WHERE status IN (...)` guards so a
//! transition is always one compare-and-swap against the expected prior
//! status, never a read followed by a write.

use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{CampaignStatus, RecipientStatus};

/// Events that move a recipient between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientEvent {
    /// A worker claimed the recipient for an account.
    Claim,
    /// The worker reported a successful send.
    Deliver,
    /// Transient failure (or expired claim) with attempts remaining.
    Retry,
    /// Terminal failure or retry ceiling reached.
    Fail,
    /// Administrative exclusion; no attempt penalty.
    Skip,
    /// Claim handed back because the owning account went away.
    Release,
}

impl RecipientEvent {
    /// Statuses this event may be applied to.
    pub fn allowed_from(&self) -> &'static [RecipientStatus] {
        use RecipientStatus::*;
        match self {
            RecipientEvent::Claim => &[Pending],
            RecipientEvent::Deliver
            | RecipientEvent::Retry
            | RecipientEvent::Fail
            | RecipientEvent::Release => &[InProgress],
            RecipientEvent::Skip => &[Pending, InProgress],
        }
    }

    /// Status after the event.
    pub fn target(&self) -> RecipientStatus {
        match self {
            RecipientEvent::Claim => RecipientStatus::InProgress,
            RecipientEvent::Deliver => RecipientStatus::Sent,
            RecipientEvent::Retry | RecipientEvent::Release => RecipientStatus::Pending,
            RecipientEvent::Fail => RecipientStatus::Failed,
            RecipientEvent::Skip => RecipientStatus::Skipped,
        }
    }

    /// Whether the attempt that led here counts toward the retry ceiling.
    pub fn counts_attempt(&self) -> bool {
        !matches!(self, RecipientEvent::Skip | RecipientEvent::Release)
    }

    /// `status IN (...)` guard for a recipient row.
    pub(crate) fn guard_sql(&self) -> String {
        format!("status IN ({})", sql_in(self.allowed_from(), RecipientStatus::as_str))
    }

    /// `status = '...'` assignment for the event's target.
    pub(crate) fn set_sql(&self) -> String {
        format!("status = '{}'", self.target().as_str())
    }

    /// New `attempt_count` expression. A claim opens an attempt; an event
    /// that does not count refunds the one an in-flight claim opened.
    pub(crate) fn attempt_sql(&self) -> &'static str {
        match self {
            RecipientEvent::Claim => "attempt_count + 1",
            e if !e.counts_attempt() => {
                "CASE WHEN status = 'in_progress' THEN MAX(attempt_count - 1, 0) ELSE attempt_count END"
            }
            _ => "attempt_count",
        }
    }
}

/// Statuses with work still outstanding.
pub(crate) fn open_recipient_statuses() -> String {
    let open: Vec<RecipientStatus> = RecipientStatus::ALL
        .into_iter()
        .filter(|s| !s.is_terminal())
        .collect();
    sql_in(&open, RecipientStatus::as_str)
}

/// Campaign statuses from which `to` may be reached.
///
/// Monotonic except for the pause/resume pair; terminal states have no exits.
pub fn campaign_sources(to: CampaignStatus) -> &'static [CampaignStatus] {
    use CampaignStatus::*;
    match to {
        Draft => &[],
        Scheduled => &[Draft],
        Running => &[Draft, Scheduled, Paused],
        Paused => &[Running],
        Completed => &[Running],
        Cancelled => &[Draft, Scheduled, Running, Paused],
    }
}

pub fn campaign_can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
    campaign_sources(to).contains(&from)
}

/// Validate a campaign status change.
pub fn campaign_transition(id: &str, from: CampaignStatus, to: CampaignStatus) -> Result<CampaignStatus> {
    if campaign_can_transition(from, to) {
        Ok(to)
    } else {
        Err(OutreachError::InvalidTransition {
            entity: format!("campaign {id}"),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Render a status list as a quoted SQL `IN` body: `'pending','in_progress'`.
pub(crate) fn sql_in<T, F>(statuses: &[T], as_str: F) -> String
where
    F: Fn(&T) -> &'static str,
{
    statuses
        .iter()
        .map(|s| format!("'{}'", as_str(s)))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use CampaignStatus as C;
    use RecipientStatus as R;

    const EVENTS: [RecipientEvent; 6] = [
        RecipientEvent::Claim,
        RecipientEvent::Deliver,
        RecipientEvent::Retry,
        RecipientEvent::Fail,
        RecipientEvent::Skip,
        RecipientEvent::Release,
    ];

    #[test]
    fn test_terminal_recipients_have_no_exits() {
        for event in EVENTS {
            assert!(
                event.allowed_from().iter().all(|s| !s.is_terminal()),
                "{event:?} leaves a terminal status"
            );
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for event in EVENTS {
            assert!(!event.allowed_from().contains(&event.target()), "{event:?} loops");
        }
    }

    #[test]
    fn test_guard_and_set_sql() {
        assert_eq!(RecipientEvent::Claim.guard_sql(), "status IN ('pending')");
        assert_eq!(RecipientEvent::Deliver.set_sql(), "status = 'sent'");
        assert_eq!(RecipientEvent::Retry.set_sql(), "status = 'pending'");
        assert_eq!(open_recipient_statuses(), "'pending','in_progress'");
    }

    #[test]
    fn test_attempt_sql() {
        assert_eq!(RecipientEvent::Claim.attempt_sql(), "attempt_count + 1");
        assert_eq!(RecipientEvent::Fail.attempt_sql(), "attempt_count");
        assert!(RecipientEvent::Skip.attempt_sql().contains("attempt_count - 1"));
        assert_eq!(RecipientEvent::Skip.attempt_sql(), RecipientEvent::Release.attempt_sql());
    }

    #[test]
    fn test_skip_and_release_do_not_count() {
        assert!(!RecipientEvent::Skip.counts_attempt());
        assert!(!RecipientEvent::Release.counts_attempt());
        assert!(RecipientEvent::Retry.counts_attempt());
    }

    #[test]
    fn test_campaign_pause_resume() {
        assert!(campaign_can_transition(C::Running, C::Paused));
        assert!(campaign_can_transition(C::Paused, C::Running));
        assert!(!campaign_can_transition(C::Paused, C::Completed));
    }

    #[test]
    fn test_campaign_terminal_immutable() {
        for to in [C::Draft, C::Scheduled, C::Running, C::Paused, C::Completed, C::Cancelled] {
            assert!(!campaign_can_transition(C::Completed, to));
            assert!(!campaign_can_transition(C::Cancelled, to));
        }
    }

    #[test]
    fn test_campaign_monotonic() {
        assert!(!campaign_can_transition(C::Running, C::Draft));
        assert!(!campaign_can_transition(C::Running, C::Scheduled));
        assert!(campaign_transition("c1", C::Draft, C::Running).is_ok());
        let err = campaign_transition("c1", C::Completed, C::Running).unwrap_err();
        assert!(err.to_string().contains("campaign c1"));
    }

    #[test]
    fn test_sql_in() {
        let body = sql_in(RecipientEvent::Skip.allowed_from(), RecipientStatus::as_str);
        assert_eq!(body, "'pending','in_progress'");
    }
}
