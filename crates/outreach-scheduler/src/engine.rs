//! Dispatch engine — the entry point request handlers call into.
//!
//! Holds the store handle and the active policy, stamps every operation with
//! the current time and a fresh RNG, and otherwise keeps no state between
//! calls. Any number of engines (in one process or many) may share a file.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use outreach_core::config::OutreachConfig;
use outreach_core::error::Result;
use outreach_core::types::{Account, Campaign, CampaignStatus, Job, Lead, Outcome};

use crate::persistence::{CampaignDb, CampaignStats, NewCampaign};
use crate::policy::DispatchPolicy;
use crate::reconciler::ReportResult;
use crate::sweep::SweepReport;
use crate::{assigner, orchestrator, reconciler, sweep};

#[derive(Clone)]
pub struct DispatchEngine {
    db: Arc<CampaignDb>,
    policy: DispatchPolicy,
}

impl DispatchEngine {
    pub fn new(db: Arc<CampaignDb>, policy: DispatchPolicy) -> Self {
        Self { db, policy }
    }

    /// Open the store at `path` with tunables from `config`.
    pub fn open(path: &Path, config: &OutreachConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = CampaignDb::open(path, config.store.busy_timeout_ms)?;
        tracing::info!("📂 Dispatch store: {}", path.display());
        Ok(Self::new(Arc::new(db), DispatchPolicy::from_config(config)))
    }

    /// In-memory engine with default policy.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(
            Arc::new(CampaignDb::open_in_memory()?),
            DispatchPolicy::default(),
        ))
    }

    pub fn db(&self) -> &CampaignDb {
        &self.db
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    // ─── Polling contract ──────────────────────────────────────

    pub fn poll(&self, account_id: &str, limit: Option<u32>) -> Result<Vec<Job>> {
        assigner::claim_jobs(
            &self.db,
            &self.policy,
            account_id,
            limit,
            Self::now(),
            &mut rand::thread_rng(),
        )
    }

    pub fn peek(&self, account_id: &str) -> Result<u32> {
        assigner::peek_jobs(&self.db, account_id, Self::now())
    }

    pub fn report(&self, recipient_id: &str, account_id: Option<&str>, outcome: &Outcome) -> Result<ReportResult> {
        reconciler::apply_outcome(&self.db, &self.policy, recipient_id, account_id, outcome, Self::now())
    }

    pub fn record_reply(&self, recipient_id: &str) -> Result<bool> {
        reconciler::record_reply(&self.db, recipient_id, Self::now())
    }

    // ─── Campaigns ──────────────────────────────────────

    pub fn create_campaign(&self, draft: &NewCampaign, lead_ids: &[String]) -> Result<Campaign> {
        orchestrator::create_campaign(&self.db, draft, lead_ids, Self::now())
    }

    pub fn process(&self, campaign_id: &str) -> Result<CampaignStatus> {
        orchestrator::process_campaign(&self.db, &self.policy, campaign_id, Self::now())
    }

    pub fn start(&self, campaign_id: &str) -> Result<CampaignStatus> {
        orchestrator::start_campaign(&self.db, campaign_id, Self::now())
    }

    pub fn schedule(&self, campaign_id: &str, at: DateTime<Utc>) -> Result<CampaignStatus> {
        orchestrator::schedule_campaign(&self.db, campaign_id, at, Self::now())
    }

    pub fn pause(&self, campaign_id: &str) -> Result<CampaignStatus> {
        orchestrator::pause_campaign(&self.db, campaign_id, Self::now())
    }

    pub fn resume(&self, campaign_id: &str) -> Result<CampaignStatus> {
        orchestrator::resume_campaign(&self.db, campaign_id, Self::now())
    }

    pub fn cancel(&self, campaign_id: &str) -> Result<CampaignStatus> {
        orchestrator::cancel_campaign(&self.db, campaign_id, Self::now())
    }

    pub fn stats(&self, campaign_id: &str) -> Result<Option<CampaignStats>> {
        self.db.campaign_stats(campaign_id)
    }

    // ─── Collaborator boundary ──────────────────────────────────────

    /// Register a connected account; `max_in_flight` falls back to the configured default.
    pub fn register_account(
        &self,
        id: &str,
        workspace_id: &str,
        platform_user_id: &str,
        max_in_flight: Option<u32>,
    ) -> Result<Account> {
        let budget = max_in_flight.unwrap_or(self.policy.claims.default_max_in_flight);
        self.db.upsert_account(id, workspace_id, platform_user_id, budget, Self::now())
    }

    pub fn upsert_lead(&self, lead: &Lead) -> Result<()> {
        self.db.upsert_lead(lead, Self::now())
    }

    /// Disconnect an account and hand back everything it holds.
    pub fn disconnect_account(&self, account_id: &str) -> Result<usize> {
        if self.db.disconnect_account(account_id)? {
            tracing::info!("🔌 Account '{account_id}' disconnected");
        }
        sweep::release_account(&self.db, account_id)
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        sweep::sweep_all(&self.db, &self.policy, Self::now())
    }
}
