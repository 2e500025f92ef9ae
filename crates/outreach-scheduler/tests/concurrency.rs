//! Concurrent pollers on one database file, each with its own connection.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use outreach_core::types::{CampaignStatus, Lead, Outcome};
use outreach_scheduler::pacing::Pacing;
use outreach_scheduler::persistence::{CampaignDb, NewCampaign};
use outreach_scheduler::policy::DispatchPolicy;
use outreach_scheduler::{assigner, reconciler};
use rand::SeedableRng;
use rand::rngs::StdRng;

const RECIPIENTS: usize = 40;
const POLLERS: usize = 4;

fn seed(path: &std::path::Path) -> String {
    let db = CampaignDb::open(path, 5000).unwrap();
    let now = Utc::now();
    for p in 0..POLLERS {
        db.upsert_account(&format!("acct-{p}"), "w1", &format!("p{p}"), 100, now)
            .unwrap();
    }
    let ids: Vec<String> = (0..RECIPIENTS)
        .map(|i| {
            let lead = Lead::new(&format!("lead-{i}"), "w1", &format!("user{i}"));
            db.upsert_lead(&lead, now).unwrap();
            lead.id
        })
        .collect();
    let draft = NewCampaign {
        workspace_id: "w1".into(),
        name: "race".into(),
        message_template: "hi {{username}}".into(),
        ..Default::default()
    };
    let campaign = db.create_campaign(&draft, &ids, now).unwrap();
    db.transition_campaign(&campaign.id, CampaignStatus::Running, now)
        .unwrap();
    campaign.id
}

fn unpaced() -> DispatchPolicy {
    DispatchPolicy {
        pacing: Pacing::new(0, 0),
        ..Default::default()
    }
}

#[test]
fn test_at_most_one_claim_per_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("dispatch.db"));
    let campaign_id = seed(&path);

    let handles: Vec<_> = (0..POLLERS)
        .map(|p| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let db = CampaignDb::open(&path, 5000).unwrap();
                let policy = unpaced();
                let mut rng = StdRng::seed_from_u64(p as u64);
                let account = format!("acct-{p}");
                let mut claimed = Vec::new();
                let mut idle = 0;
                while idle < 3 {
                    let jobs =
                        assigner::claim_jobs(&db, &policy, &account, Some(3), Utc::now(), &mut rng)
                            .unwrap();
                    if jobs.is_empty() {
                        idle += 1;
                    } else {
                        idle = 0;
                    }
                    claimed.extend(jobs.into_iter().map(|j| j.recipient_id));
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for rid in handle.join().unwrap() {
            total += 1;
            assert!(seen.insert(rid.clone()), "recipient {rid} claimed twice");
        }
    }
    assert_eq!(total, RECIPIENTS);

    let db = CampaignDb::open(&path, 5000).unwrap();
    let stats = db.campaign_stats(&campaign_id).unwrap().unwrap();
    assert_eq!(stats.in_progress as usize, RECIPIENTS);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_racing_success_reports_count_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("dispatch.db"));
    let campaign_id = seed(&path);

    let db = CampaignDb::open(&path, 5000).unwrap();
    let now = Utc::now();
    let recipients = db.list_recipients(&campaign_id).unwrap();
    for r in &recipients {
        assert!(db.claim_recipient(&r.id, "acct-0", now).unwrap());
    }
    let ids: Arc<Vec<String>> = Arc::new(recipients.into_iter().map(|r| r.id).collect());

    let handles: Vec<_> = (0..POLLERS)
        .map(|_| {
            let path = Arc::clone(&path);
            let ids = Arc::clone(&ids);
            thread::spawn(move || {
                let db = CampaignDb::open(&path, 5000).unwrap();
                let policy = DispatchPolicy::default();
                for rid in ids.iter() {
                    reconciler::apply_outcome(
                        &db,
                        &policy,
                        rid,
                        Some("acct-0"),
                        &Outcome::Success,
                        Utc::now(),
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let campaign = db.get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(campaign.sent_count as usize, RECIPIENTS);
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert!(campaign.completed_at.unwrap() >= now - Duration::seconds(1));
}
