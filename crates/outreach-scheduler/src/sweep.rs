//! Recovery sweeps: expired claims and claims held by disconnected accounts.

use chrono::{DateTime, Utc};
use outreach_core::error::Result;
use serde::Serialize;

use crate::persistence::CampaignDb;
use crate::policy::DispatchPolicy;
use crate::retry::{CLAIM_EXPIRED, FailureClass, RetryDecision};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired claims put back to pending.
    pub retried: usize,
    /// Expired claims that hit the attempt ceiling.
    pub failed: usize,
    /// Claims handed back by disconnected accounts.
    pub released: usize,
}

/// Treat every claim older than the staleness threshold as a transient failure.
///
/// Each recipient goes through the same CAS as a worker report, so a report
/// arriving mid-sweep wins or loses cleanly.
pub fn reclaim_stale(
    db: &CampaignDb,
    policy: &DispatchPolicy,
    campaign_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let cutoff = now - policy.stale_after();
    let mut report = SweepReport::default();

    for claim in db.stale_claims(cutoff, campaign_id)? {
        match policy.retry.decide(claim.attempt_count, FailureClass::Transient, now) {
            RetryDecision::Retry { next_action_at } => {
                if db.retry_recipient(&claim.recipient_id, claim.attempt_count, next_action_at, CLAIM_EXPIRED)? {
                    report.retried += 1;
                }
            }
            RetryDecision::GiveUp => {
                if db.fail_recipient(&claim.recipient_id, claim.attempt_count, CLAIM_EXPIRED)? {
                    report.failed += 1;
                }
            }
        }
    }

    if report.retried + report.failed > 0 {
        tracing::warn!(
            "⏰ Reclaimed {} stale claim(s): {} retried, {} failed",
            report.retried + report.failed,
            report.retried,
            report.failed
        );
    }
    Ok(report)
}

/// Release everything a (disconnected) account holds.
pub fn release_account(db: &CampaignDb, account_id: &str) -> Result<usize> {
    let released = db.release_account(account_id)?;
    if released > 0 {
        tracing::warn!("🔌 Released {released} claim(s) held by account '{account_id}'");
    }
    Ok(released)
}

/// Global sweep: stale claims everywhere plus any disconnected account still holding work.
pub fn sweep_all(db: &CampaignDb, policy: &DispatchPolicy, now: DateTime<Utc>) -> Result<SweepReport> {
    let mut report = reclaim_stale(db, policy, None, now)?;
    for account_id in db.disconnected_accounts_with_claims()? {
        report.released += release_account(db, &account_id)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NewCampaign;
    use chrono::Duration;
    use outreach_core::types::{CampaignStatus, Lead, RecipientStatus};

    fn setup(n: usize) -> (CampaignDb, String) {
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
        (db, c.id)
    }

    #[test]
    fn test_fresh_claims_untouched() {
        let (db, cid) = setup(1);
        let now = Utc::now();
        let r = &db.list_recipients(&cid).unwrap()[0];
        db.claim_recipient(&r.id, "acct", now).unwrap();
        let report = reclaim_stale(&db, &DispatchPolicy::default(), None, now + Duration::seconds(60)).unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn test_stale_claim_retried_with_sticky_owner() {
        let (db, cid) = setup(1);
        let now = Utc::now();
        let r = &db.list_recipients(&cid).unwrap()[0];
        db.claim_recipient(&r.id, "acct", now).unwrap();

        let later = now + Duration::seconds(601);
        let report = reclaim_stale(&db, &DispatchPolicy::default(), Some(&cid), later).unwrap();
        assert_eq!(report.retried, 1);

        let r = db.get_recipient(&r.id).unwrap().unwrap();
        assert_eq!(r.status, RecipientStatus::Pending);
        assert_eq!(r.last_error.as_deref(), Some(CLAIM_EXPIRED));
        assert_eq!(r.assigned_account_id.as_deref(), Some("acct"));
        assert!(r.next_action_at.unwrap() > later);
    }

    #[test]
    fn test_stale_claim_at_ceiling_fails() {
        let (db, cid) = setup(1);
        let policy = DispatchPolicy::default();
        let mut now = Utc::now();
        let rid = db.list_recipients(&cid).unwrap()[0].id.clone();
        for _ in 0..policy.retry.max_attempts {
            now += Duration::hours(1);
            assert!(db.claim_recipient(&rid, "acct", now).unwrap());
            now += Duration::hours(1);
            reclaim_stale(&db, &policy, None, now).unwrap();
        }
        let r = db.get_recipient(&rid).unwrap().unwrap();
        assert_eq!(r.status, RecipientStatus::Failed);
        assert!(r.next_action_at.is_none());
    }

    #[test]
    fn test_sweep_all_releases_disconnected() {
        let (db, cid) = setup(2);
        let now = Utc::now();
        for r in db.list_recipients(&cid).unwrap() {
            db.claim_recipient(&r.id, "acct", now).unwrap();
        }
        db.disconnect_account("acct").unwrap();

        let report = sweep_all(&db, &DispatchPolicy::default(), now).unwrap();
        assert_eq!(report.released, 2);
        for r in db.list_recipients(&cid).unwrap() {
            assert_eq!(r.status, RecipientStatus::Pending);
            assert!(r.assigned_account_id.is_none());
            assert_eq!(r.attempt_count, 0);
        }
        assert_eq!(sweep_all(&db, &DispatchPolicy::default(), now).unwrap().released, 0);
    }
}
