//! Campaign orchestrator — lifecycle commands and the per-campaign process pass.

use chrono::{DateTime, Utc};
use outreach_core::config::MAX_PACING_DELAY_SECS;
use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{Campaign, CampaignStatus};

use crate::lifecycle;
use crate::persistence::{CampaignDb, NewCampaign};
use crate::policy::DispatchPolicy;
use crate::sweep;

/// Build a draft campaign from a lead list.
pub fn create_campaign(
    db: &CampaignDb,
    draft: &NewCampaign,
    lead_ids: &[String],
    now: DateTime<Utc>,
) -> Result<Campaign> {
    if draft.name.trim().is_empty() {
        return Err(OutreachError::InvalidInput("campaign name is empty".into()));
    }
    if draft.message_template.trim().is_empty() {
        return Err(OutreachError::InvalidInput("message template is empty".into()));
    }
    validate_window(draft)?;
    let campaign = db.create_campaign(draft, lead_ids, now)?;
    tracing::info!(
        "📋 Campaign '{}' created ({}) with {} recipient(s)",
        campaign.name,
        campaign.id,
        campaign.total_recipients
    );
    Ok(campaign)
}

/// One orchestration pass. Safe to call any number of times.
///
/// Promotes a due scheduled campaign, reclaims this campaign's stale claims,
/// then completes it if nothing is left to send. Finished campaigns are
/// returned untouched.
pub fn process_campaign(
    db: &CampaignDb,
    policy: &DispatchPolicy,
    campaign_id: &str,
    now: DateTime<Utc>,
) -> Result<CampaignStatus> {
    let campaign = load(db, campaign_id)?;
    if campaign.status.is_terminal() {
        return Ok(campaign.status);
    }

    if campaign.status == CampaignStatus::Scheduled && db.promote_scheduled(campaign_id, now)? {
        tracing::info!("▶️ Scheduled campaign {campaign_id} is now running");
    }

    sweep::reclaim_stale(db, policy, Some(campaign_id), now)?;

    if db.complete_if_drained(campaign_id, now)? {
        tracing::info!("🏁 Campaign {campaign_id} completed");
    }
    Ok(load(db, campaign_id)?.status)
}

/// DRAFT/SCHEDULED → RUNNING.
pub fn start_campaign(db: &CampaignDb, campaign_id: &str, now: DateTime<Utc>) -> Result<CampaignStatus> {
    let campaign = load(db, campaign_id)?;
    if campaign.status == CampaignStatus::Paused {
        return Err(OutreachError::InvalidTransition {
            entity: format!("campaign {campaign_id}"),
            from: campaign.status.to_string(),
            to: "running (use resume)".into(),
        });
    }
    transition(db, campaign_id, CampaignStatus::Running, now)
}

/// DRAFT → SCHEDULED, to be promoted by a later process pass.
pub fn schedule_campaign(
    db: &CampaignDb,
    campaign_id: &str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<CampaignStatus> {
    if db.schedule_campaign(campaign_id, at, now)? {
        tracing::info!("📅 Campaign {campaign_id} scheduled for {at}");
        return Ok(CampaignStatus::Scheduled);
    }
    let campaign = load(db, campaign_id)?;
    lifecycle::campaign_transition(campaign_id, campaign.status, CampaignStatus::Scheduled)?;
    Ok(campaign.status)
}

pub fn pause_campaign(db: &CampaignDb, campaign_id: &str, now: DateTime<Utc>) -> Result<CampaignStatus> {
    transition(db, campaign_id, CampaignStatus::Paused, now)
}

/// PAUSED → RUNNING.
pub fn resume_campaign(db: &CampaignDb, campaign_id: &str, now: DateTime<Utc>) -> Result<CampaignStatus> {
    let campaign = load(db, campaign_id)?;
    match campaign.status {
        CampaignStatus::Paused => transition(db, campaign_id, CampaignStatus::Running, now),
        CampaignStatus::Running => Ok(CampaignStatus::Running),
        other => Err(OutreachError::InvalidTransition {
            entity: format!("campaign {campaign_id}"),
            from: other.to_string(),
            to: "running (resume)".into(),
        }),
    }
}

/// Terminal. Every unfinished recipient becomes SKIPPED.
pub fn cancel_campaign(db: &CampaignDb, campaign_id: &str, now: DateTime<Utc>) -> Result<CampaignStatus> {
    match db.cancel_campaign(campaign_id, now)? {
        Some(skipped) => {
            tracing::info!("⏹️ Campaign {campaign_id} cancelled, {skipped} recipient(s) skipped");
            Ok(CampaignStatus::Cancelled)
        }
        None => settle(db, campaign_id, CampaignStatus::Cancelled),
    }
}

fn validate_window(draft: &NewCampaign) -> Result<()> {
    for (field, secs) in [("minDelaySecs", draft.min_delay_secs), ("maxDelaySecs", draft.max_delay_secs)] {
        if secs.is_some_and(|s| s > MAX_PACING_DELAY_SECS) {
            return Err(OutreachError::InvalidInput(format!(
                "{field} must not exceed {MAX_PACING_DELAY_SECS}"
            )));
        }
    }
    if let (Some(min), Some(max)) = (draft.min_delay_secs, draft.max_delay_secs) {
        if min > max {
            return Err(OutreachError::InvalidInput(format!(
                "minDelaySecs ({min}) exceeds maxDelaySecs ({max})"
            )));
        }
    }
    Ok(())
}

fn load(db: &CampaignDb, campaign_id: &str) -> Result<Campaign> {
    db.get_campaign(campaign_id)?
        .ok_or_else(|| OutreachError::NotFound(format!("campaign {campaign_id}")))
}

fn transition(db: &CampaignDb, campaign_id: &str, to: CampaignStatus, now: DateTime<Utc>) -> Result<CampaignStatus> {
    if db.transition_campaign(campaign_id, to, now)? {
        tracing::info!("Campaign {campaign_id} → {to}");
        return Ok(to);
    }
    settle(db, campaign_id, to)
}

/// The CAS did not apply: either we are already there, the move is illegal,
/// or a concurrent command got in first. Report the status it landed on.
fn settle(db: &CampaignDb, campaign_id: &str, to: CampaignStatus) -> Result<CampaignStatus> {
    let current = load(db, campaign_id)?.status;
    if current != to {
        lifecycle::campaign_transition(campaign_id, current, to)?;
    }
    Ok(current)
}
