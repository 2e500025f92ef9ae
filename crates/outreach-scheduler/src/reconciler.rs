//! Outcome reconciler — applies worker reports to recipient state.
//!
//! Reports are at-least-once from the worker's side. Anything that does not
//! match a live claim (already reported, reclaimed, foreign account) comes
//! back as [`ReportResult::Dropped`] instead of an error.

use chrono::{DateTime, Utc};
use outreach_core::error::Result;
use outreach_core::types::{Outcome, RecipientStatus};
use serde::Serialize;

use crate::persistence::CampaignDb;
use crate::policy::DispatchPolicy;
use crate::retry::{self, FailureClass, RetryDecision};
use crate::sweep;

const UNKNOWN_REASON: &str = "unknown error";
const WORKER_SKIPPED: &str = "skipped by worker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ReportResult {
    Sent,
    Retrying { next_action_at: DateTime<Utc> },
    Failed { class: FailureClass },
    Skipped,
    /// Duplicate, late or foreign report; nothing changed.
    Dropped,
}

/// Apply one worker report, then run the campaign completion check.
pub fn apply_outcome(
    db: &CampaignDb,
    policy: &DispatchPolicy,
    recipient_id: &str,
    account_id: Option<&str>,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<ReportResult> {
    let Some(recipient) = db.get_recipient(recipient_id)? else {
        tracing::warn!("Report for unknown recipient {recipient_id} dropped");
        return Ok(ReportResult::Dropped);
    };

    let owner = recipient.assigned_account_id.as_deref();
    let foreign = account_id.is_some_and(|a| owner != Some(a));
    if recipient.status != RecipientStatus::InProgress || foreign {
        tracing::warn!(
            "Report for {recipient_id} dropped (status {}, owner {:?}, reporter {:?})",
            recipient.status,
            owner,
            account_id
        );
        return Ok(ReportResult::Dropped);
    }

    let result = match outcome {
        Outcome::Success => {
            if db.deliver_recipient(recipient_id, account_id, now)? {
                ReportResult::Sent
            } else {
                ReportResult::Dropped
            }
        }
        Outcome::Failure { reason } => {
            let reason = match reason.trim() {
                "" => UNKNOWN_REASON,
                r => r,
            };
            let class = retry::classify(reason);
            let attempt = recipient.attempt_count;
            let applied = match policy.retry.decide(attempt, class, now) {
                RetryDecision::Retry { next_action_at } => db
                    .retry_recipient(recipient_id, attempt, next_action_at, reason)?
                    .then_some(ReportResult::Retrying { next_action_at }),
                RetryDecision::GiveUp => db
                    .fail_recipient(recipient_id, attempt, reason)?
                    .then_some(ReportResult::Failed { class }),
            };
            if applied.is_some() && class == FailureClass::TerminalAccount {
                if let Some(owner) = owner {
                    if db.disconnect_account(owner)? {
                        tracing::warn!("🚫 Account '{owner}' disconnected: {reason}");
                    }
                    sweep::release_account(db, owner)?;
                }
            }
            applied.unwrap_or(ReportResult::Dropped)
        }
        Outcome::Skipped => {
            if db.skip_recipient(recipient_id, account_id, WORKER_SKIPPED)? {
                ReportResult::Skipped
            } else {
                ReportResult::Dropped
            }
        }
    };

    if result == ReportResult::Dropped {
        tracing::warn!("Report for {recipient_id} lost a race and was dropped");
        return Ok(result);
    }

    tracing::debug!("Recipient {recipient_id}: {result:?}");
    if db.complete_if_drained(&recipient.campaign_id, now)? {
        tracing::info!("🏁 Campaign {} completed", recipient.campaign_id);
    }
    Ok(result)
}

/// Record an inbound reply. Returns false if the recipient was never sent
/// or already counted.
pub fn record_reply(db: &CampaignDb, recipient_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let recorded = db.record_reply(recipient_id, now)?;
    if recorded {
        tracing::info!("💬 Reply recorded for {recipient_id}");
    }
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NewCampaign;
    use chrono::Duration;
    use outreach_core::types::{AccountStatus, CampaignStatus, Lead};

    fn setup(n: usize) -> (CampaignDb, String, Vec<String>) {
        let db = CampaignDb::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_account("acct", "w1", "p1", 5, now).unwrap();
        let ids: Vec<String> = (0..n)
            .map(|i| {
                let lead = Lead::new(&format!("l{i}"), "w1", "h");
                db.upsert_lead(&lead, now).unwrap();
                lead.id
            })
            .collect();
        let draft = NewCampaign {
            workspace_id: "w1".into(),
            name: "c".into(),
            message_template: "x".into(),
            ..Default::default()
        };
        let c = db.create_campaign(&draft, &ids, now).unwrap();
        db.transition_campaign(&c.id, CampaignStatus::Running, now).unwrap();
        let rids = db.list_recipients(&c.id).unwrap().into_iter().map(|r| r.id).collect();
        (db, c.id, rids)
    }

    fn failure(reason: &str) -> Outcome {
        Outcome::Failure { reason: reason.into() }
    }

    #[test]
    fn test_success_completes_campaign() {
        let (db, cid, rids) = setup(1);
        let now = Utc::now();
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        let policy = DispatchPolicy::default();

        let result = apply_outcome(&db, &policy, &rids[0], Some("acct"), &Outcome::Success, now).unwrap();
        assert_eq!(result, ReportResult::Sent);
        let c = db.get_campaign(&cid).unwrap().unwrap();
        assert_eq!(c.sent_count, 1);
        assert_eq!(c.status, CampaignStatus::Completed);
    }

    #[test]
    fn test_duplicate_success_dropped() {
        let (db, cid, rids) = setup(2);
        let now = Utc::now();
        let policy = DispatchPolicy::default();
        db.claim_recipient(&rids[0], "acct", now).unwrap();

        apply_outcome(&db, &policy, &rids[0], Some("acct"), &Outcome::Success, now).unwrap();
        let again = apply_outcome(&db, &policy, &rids[0], Some("acct"), &Outcome::Success, now).unwrap();
        assert_eq!(again, ReportResult::Dropped);
        assert_eq!(db.get_campaign(&cid).unwrap().unwrap().sent_count, 1);
    }

    #[test]
    fn test_foreign_report_dropped() {
        let (db, _, rids) = setup(1);
        let now = Utc::now();
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        let result =
            apply_outcome(&db, &DispatchPolicy::default(), &rids[0], Some("intruder"), &Outcome::Success, now)
                .unwrap();
        assert_eq!(result, ReportResult::Dropped);
        assert_eq!(db.get_recipient(&rids[0]).unwrap().unwrap().status, RecipientStatus::InProgress);
    }

    #[test]
    fn test_transient_then_terminal_at_ceiling() {
        let (db, _, rids) = setup(1);
        let policy = DispatchPolicy::default();
        let max = policy.retry.max_attempts;
        let mut now = Utc::now();
        let rid = &rids[0];
        let mut previous: Option<(DateTime<Utc>, Duration)> = None;

        for attempt in 1..max {
            assert!(db.claim_recipient(rid, "acct", now).unwrap());
            let result = apply_outcome(&db, &policy, rid, Some("acct"), &failure("timeout"), now).unwrap();
            assert!(matches!(result, ReportResult::Retrying { .. }), "attempt {attempt}: {result:?}");
            let r = db.get_recipient(rid).unwrap().unwrap();
            assert_eq!(r.status, RecipientStatus::Pending);
            assert_eq!(r.attempt_count, attempt);
            assert_eq!(r.assigned_account_id.as_deref(), Some("acct"));
            let at = r.next_action_at.unwrap();
            let delay = at - now;
            if let Some((prev_at, prev_delay)) = previous {
                assert!(at > prev_at, "nextActionAt went backwards on attempt {attempt}");
                assert!(delay >= prev_delay, "backoff shrank on attempt {attempt}");
            }
            previous = Some((at, delay));
            now = at;
        }
        assert!(previous.is_some());

        assert!(db.claim_recipient(rid, "acct", now).unwrap());
        let result = apply_outcome(&db, &policy, rid, Some("acct"), &failure("timeout"), now).unwrap();
        assert_eq!(result, ReportResult::Failed { class: FailureClass::Transient });
        let r = db.get_recipient(rid).unwrap().unwrap();
        assert_eq!(r.status, RecipientStatus::Failed);
        assert_eq!(r.attempt_count, max);
        assert!(r.next_action_at.is_none());
        assert_eq!(r.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_terminal_target_fails_immediately() {
        let (db, cid, rids) = setup(2);
        let now = Utc::now();
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        let result =
            apply_outcome(&db, &DispatchPolicy::default(), &rids[0], None, &failure("user blocked you"), now).unwrap();
        assert_eq!(result, ReportResult::Failed { class: FailureClass::TerminalTarget });
        assert_eq!(db.get_campaign(&cid).unwrap().unwrap().status, CampaignStatus::Running);
    }

    #[test]
    fn test_banned_account_disconnected_and_released() {
        let (db, _, rids) = setup(2);
        let now = Utc::now();
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        db.claim_recipient(&rids[1], "acct", now).unwrap();

        let result = apply_outcome(
            &db,
            &DispatchPolicy::default(),
            &rids[0],
            Some("acct"),
            &failure("account_banned"),
            now,
        )
        .unwrap();
        assert_eq!(result, ReportResult::Failed { class: FailureClass::TerminalAccount });
        assert_eq!(db.get_account("acct").unwrap().unwrap().status, AccountStatus::Disconnected);

        let other = db.get_recipient(&rids[1]).unwrap().unwrap();
        assert_eq!(other.status, RecipientStatus::Pending);
        assert!(other.assigned_account_id.is_none());
    }

    #[test]
    fn test_skip_has_no_penalty_and_completes() {
        let (db, cid, rids) = setup(1);
        let now = Utc::now();
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        let result =
            apply_outcome(&db, &DispatchPolicy::default(), &rids[0], Some("acct"), &Outcome::Skipped, now).unwrap();
        assert_eq!(result, ReportResult::Skipped);
        let r = db.get_recipient(&rids[0]).unwrap().unwrap();
        assert_eq!(r.status, RecipientStatus::Skipped);
        assert_eq!(r.attempt_count, 0);
        assert_eq!(db.get_campaign(&cid).unwrap().unwrap().status, CampaignStatus::Completed);
    }

    #[test]
    fn test_late_report_after_reclaim_dropped() {
        let (db, _, rids) = setup(1);
        let policy = DispatchPolicy::default();
        let now = Utc::now();
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        sweep::reclaim_stale(&db, &policy, None, now + Duration::hours(1)).unwrap();

        let result = apply_outcome(&db, &policy, &rids[0], Some("acct"), &Outcome::Success, now).unwrap();
        assert_eq!(result, ReportResult::Dropped);
    }

    #[test]
    fn test_report_result_wire_shape() {
        let at = crate::persistence::from_ms(1_700_000_000_000);
        let json = serde_json::to_value(ReportResult::Retrying { next_action_at: at }).unwrap();
        assert_eq!(json["result"], "retrying");
        assert!(json["nextActionAt"].is_string());
        let json = serde_json::to_value(ReportResult::Failed { class: FailureClass::TerminalTarget }).unwrap();
        assert_eq!(json["result"], "failed");
    }

    #[test]
    fn test_reply_counted_once() {
        let (db, cid, rids) = setup(2);
        let now = Utc::now();
        assert!(!record_reply(&db, &rids[0], now).unwrap());
        db.claim_recipient(&rids[0], "acct", now).unwrap();
        apply_outcome(&db, &DispatchPolicy::default(), &rids[0], None, &Outcome::Success, now).unwrap();
        assert!(record_reply(&db, &rids[0], now).unwrap());
        assert!(!record_reply(&db, &rids[0], now).unwrap());
        assert_eq!(db.get_campaign(&cid).unwrap().unwrap().reply_count, 1);
    }
}
