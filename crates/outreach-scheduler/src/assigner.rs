//! Account assigner — turns a worker poll into a batch of claimed jobs.
//!
//! A poll is scoped to one account. The order of operations matters:
//!
//! ```text
//! account active? ──no──► release its claims, empty batch
//!   │
//! cool-down over? ──no──► empty batch
//!   │
//! budget = max_in_flight − in_progress ──0──► empty batch
//!   │
//! candidates? ──none──► empty batch (pacing slot untouched)
//!   │
//! reserve pacing slot (CAS) ──lost──► empty batch
//!   │
//! claim each candidate (CAS) until batch full
//!   │
//! nothing claimed ──► roll the reservation back
//! otherwise       ──► settle cool-down on the batch's widest window
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use outreach_core::error::Result;
use outreach_core::types::{Campaign, Job};
use rand::Rng;

use crate::pacing::{self, Pacing};
use crate::persistence::CampaignDb;
use crate::policy::DispatchPolicy;
use crate::sweep;
use crate::template;

/// How many extra candidates to read per requested job, to absorb lost races.
const CANDIDATE_OVERFETCH: u32 = 4;

/// Claim up to `requested` jobs for `account_id`.
///
/// An empty result is the normal "nothing for you right now" answer.
pub fn claim_jobs<R: Rng + ?Sized>(
    db: &CampaignDb,
    policy: &DispatchPolicy,
    account_id: &str,
    requested: Option<u32>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Vec<Job>> {
    let Some(account) = db.get_account(account_id)? else {
        tracing::debug!("Poll from unknown account '{account_id}'");
        return Ok(Vec::new());
    };

    if !account.is_active() {
        sweep::release_account(db, account_id)?;
        return Ok(Vec::new());
    }

    if !pacing::is_ready(account.cooldown_until, now) {
        tracing::debug!("Account '{account_id}' cooling down until {:?}", account.cooldown_until);
        return Ok(Vec::new());
    }

    let in_flight = db.count_in_flight(account_id)?;
    let budget = account.max_in_flight.saturating_sub(in_flight);
    if budget == 0 {
        tracing::debug!("Account '{account_id}' at in-flight limit ({in_flight})");
        return Ok(Vec::new());
    }
    let batch = policy.batch_size(requested).min(budget);

    let candidates = db.eligible_recipients(&account, now, batch.saturating_mul(CANDIDATE_OVERFETCH))?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let reserved_until = policy.pacing.cooldown_until(now, rng);
    if !db.reserve_dispatch_slot(account_id, now, reserved_until)? {
        tracing::debug!("Account '{account_id}' lost the pacing slot to a concurrent poll");
        return Ok(Vec::new());
    }

    let mut jobs = Vec::with_capacity(batch as usize);
    let mut campaigns: HashMap<String, Campaign> = HashMap::new();
    let mut window: Option<Pacing> = None;

    for recipient_id in &candidates {
        if jobs.len() as u32 >= batch {
            break;
        }
        if !db.claim_recipient(recipient_id, account_id, now)? {
            continue;
        }
        let Some(recipient) = db.get_recipient(recipient_id)? else {
            continue;
        };

        let campaign = match campaigns.get(&recipient.campaign_id) {
            Some(c) => c.clone(),
            None => match db.get_campaign(&recipient.campaign_id)? {
                Some(c) => {
                    campaigns.insert(c.id.clone(), c.clone());
                    c
                }
                None => continue,
            },
        };

        let Some(lead) = db.get_lead(&recipient.lead_id)? else {
            tracing::warn!("Lead '{}' vanished, skipping recipient {recipient_id}", recipient.lead_id);
            db.skip_recipient(recipient_id, Some(account_id), "lead not found")?;
            continue;
        };

        let campaign_window = policy.pacing.for_campaign(&campaign);
        window = Some(window.map_or(campaign_window, |w| w.widest(campaign_window)));

        tracing::debug!(
            "Claimed {recipient_id} for '{account_id}' (attempt {})",
            recipient.attempt_count
        );
        jobs.push(Job {
            recipient_id: recipient.id,
            campaign_id: campaign.id.clone(),
            account_id: account_id.to_string(),
            message: template::render(&campaign.message_template, &lead),
            recipient_handle: lead.handle.trim_start_matches('@').to_string(),
            attempt: recipient.attempt_count,
        });
    }

    match window {
        None => {
            db.release_dispatch_slot(&account, reserved_until)?;
        }
        Some(window) if window != policy.pacing => {
            db.settle_cooldown(account_id, reserved_until, window.cooldown_until(now, rng))?;
        }
        Some(_) => {}
    }

    if !jobs.is_empty() {
        tracing::info!("📤 {} job(s) handed to account '{account_id}'", jobs.len());
    }
    Ok(jobs)
}

/// Count what `account_id` could claim right now, without claiming.
pub fn peek_jobs(db: &CampaignDb, account_id: &str, now: DateTime<Utc>) -> Result<u32> {
    match db.get_account(account_id)? {
        Some(account) if account.is_active() => db.count_eligible(&account, now),
        _ => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NewCampaign;
    use chrono::Duration;
    use outreach_core::types::{CampaignStatus, Lead, RecipientStatus};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup(n: usize, template: &str) -> (CampaignDb, Campaign) {
        let db = CampaignDb::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_account("acct", "w1", "p1", 5, now).unwrap();
        let mut ids = Vec::new();
        for i in 0..n {
            let lead = Lead::new(&format!("l{i}"), "w1", &format!("@user{i}"));
            db.upsert_lead(&lead, now).unwrap();
            ids.push(lead.id);
        }
        let draft = NewCampaign {
            workspace_id: "w1".into(),
            name: "c".into(),
            message_template: template.into(),
            ..Default::default()
        };
        let campaign = db.create_campaign(&draft, &ids, now).unwrap();
        db.transition_campaign(&campaign.id, CampaignStatus::Running, now).unwrap();
        (db, campaign)
    }

    #[test]
    fn test_batch_then_cooldown_then_remainder() {
        let (db, _) = setup(3, "hi {{username}}");
        let policy = DispatchPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();

        let first = claim_jobs(&db, &policy, "acct", Some(2), now, &mut rng).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message, "hi user0");
        assert_eq!(first[0].recipient_handle, "user0");
        assert_eq!(first[0].attempt, 1);

        let second = claim_jobs(&db, &policy, "acct", Some(2), now + Duration::seconds(1), &mut rng).unwrap();
        assert!(second.is_empty());

        let later = now + Duration::seconds(16);
        let third = claim_jobs(&db, &policy, "acct", Some(2), later, &mut rng).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].message, "hi user2");
    }

    #[test]
    fn test_unknown_account_gets_nothing() {
        let (db, _) = setup(1, "x");
        let mut rng = StdRng::seed_from_u64(1);
        let jobs = claim_jobs(&db, &DispatchPolicy::default(), "ghost", None, Utc::now(), &mut rng).unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_budget_limits_batch() {
        let (db, _) = setup(5, "x");
        let now = Utc::now();
        db.upsert_account("acct", "w1", "p1", 2, now).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let jobs = claim_jobs(&db, &DispatchPolicy::default(), "acct", Some(10), now, &mut rng).unwrap();
        assert_eq!(jobs.len(), 2);

        let later = now + Duration::minutes(5);
        let jobs = claim_jobs(&db, &DispatchPolicy::default(), "acct", Some(10), later, &mut rng).unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_no_candidates_keeps_pacing_slot() {
        let (db, campaign) = setup(1, "x");
        let now = Utc::now();
        db.transition_campaign(&campaign.id, CampaignStatus::Paused, now).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(claim_jobs(&db, &DispatchPolicy::default(), "acct", None, now, &mut rng).unwrap().is_empty());
        assert!(db.get_account("acct").unwrap().unwrap().cooldown_until.is_none());

        db.transition_campaign(&campaign.id, CampaignStatus::Running, now).unwrap();
        assert_eq!(claim_jobs(&db, &DispatchPolicy::default(), "acct", None, now, &mut rng).unwrap().len(), 1);
    }

    #[test]
    fn test_sticky_assignment() {
        let (db, campaign) = setup(1, "x");
        let now = Utc::now();
        db.upsert_account("other", "w1", "p2", 5, now).unwrap();
        let policy = DispatchPolicy::default();
        let mut rng = StdRng::seed_from_u64(9);

        let jobs = claim_jobs(&db, &policy, "acct", None, now, &mut rng).unwrap();
        let rid = jobs[0].recipient_id.clone();
        let r = db.get_recipient(&rid).unwrap().unwrap();
        db.retry_recipient(&rid, r.attempt_count, now, "timeout").unwrap();

        assert!(claim_jobs(&db, &policy, "other", None, now, &mut rng).unwrap().is_empty());
        let later = now + Duration::seconds(20);
        let again = claim_jobs(&db, &policy, "acct", None, later, &mut rng).unwrap();
        assert_eq!(again[0].recipient_id, rid);
        assert_eq!(again[0].attempt, 2);
        assert_eq!(db.list_recipients(&campaign.id).unwrap()[0].assigned_account_id.as_deref(), Some("acct"));
    }

    #[test]
    fn test_workspace_scoped() {
        let (db, _) = setup(1, "x");
        let now = Utc::now();
        db.upsert_account("foreign", "w2", "p9", 5, now).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(claim_jobs(&db, &DispatchPolicy::default(), "foreign", None, now, &mut rng).unwrap().is_empty());
        assert_eq!(peek_jobs(&db, "foreign", now).unwrap(), 0);
        assert_eq!(peek_jobs(&db, "acct", now).unwrap(), 1);
    }

    #[test]
    fn test_disconnected_account_releases_claims() {
        let (db, campaign) = setup(2, "x");
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(4);
        claim_jobs(&db, &DispatchPolicy::default(), "acct", Some(2), now, &mut rng).unwrap();
        db.disconnect_account("acct").unwrap();

        assert!(claim_jobs(&db, &DispatchPolicy::default(), "acct", None, now, &mut rng).unwrap().is_empty());
        for r in db.list_recipients(&campaign.id).unwrap() {
            assert_eq!(r.status, RecipientStatus::Pending);
            assert!(r.assigned_account_id.is_none());
        }
    }

    #[test]
    fn test_campaign_window_overrides_cooldown() {
        let db = CampaignDb::open_in_memory().unwrap();
        let now = crate::persistence::from_ms(1_700_000_000_000);
        db.upsert_account("acct", "w1", "p1", 5, now).unwrap();
        db.upsert_lead(&Lead::new("l0", "w1", "a"), now).unwrap();
        let draft = NewCampaign {
            workspace_id: "w1".into(),
            name: "slow".into(),
            message_template: "x".into(),
            min_delay_secs: Some(60),
            max_delay_secs: Some(120),
        };
        let campaign = db.create_campaign(&draft, &["l0".to_string()], now).unwrap();
        db.transition_campaign(&campaign.id, CampaignStatus::Running, now).unwrap();

        let mut rng = StdRng::seed_from_u64(5);
        claim_jobs(&db, &DispatchPolicy::default(), "acct", None, now, &mut rng).unwrap();
        let until = db.get_account("acct").unwrap().unwrap().cooldown_until.unwrap();
        assert!(until >= now + Duration::seconds(60));
        assert!(until <= now + Duration::seconds(120));
    }

    #[test]
    fn test_stored_oversized_window_still_hands_out_job() {
        let db = CampaignDb::open_in_memory().unwrap();
        let now = crate::persistence::from_ms(1_700_000_000_000);
        db.upsert_account("acct", "w1", "p1", 5, now).unwrap();
        db.upsert_lead(&Lead::new("l0", "w1", "a"), now).unwrap();
        let draft = NewCampaign {
            workspace_id: "w1".into(),
            name: "legacy".into(),
            message_template: "x".into(),
            min_delay_secs: Some(10_000_000_000_000),
            max_delay_secs: Some(10_000_000_000_000),
        };
        let campaign = db.create_campaign(&draft, &["l0".to_string()], now).unwrap();
        db.transition_campaign(&campaign.id, CampaignStatus::Running, now).unwrap();

        let mut rng = StdRng::seed_from_u64(8);
        let jobs = claim_jobs(&db, &DispatchPolicy::default(), "acct", None, now, &mut rng).unwrap();
        assert_eq!(jobs.len(), 1);
        let until = db.get_account("acct").unwrap().unwrap().cooldown_until.unwrap();
        assert_eq!(until, now + Duration::days(1));
    }
}
