//! SQLite-backed persistence for campaigns, recipients, accounts and leads.
//!
//! Every state change is a single conditional statement (or one immediate
//! transaction of them) guarded on the expected prior status. The store is
//! the only coordination point between request handlers: any number of
//! processes may open the same file and poll concurrently.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{Account, Campaign, CampaignStatus, Lead, Recipient, RecipientStatus};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{RecipientEvent, campaign_sources, open_recipient_statuses, sql_in};

/// Persistent store for all dispatch state.
pub struct CampaignDb {
    conn: Mutex<Connection>,
}

/// Fields supplied when building a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub workspace_id: String,
    pub name: String,
    pub message_template: String,
    #[serde(default)]
    pub min_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
}

/// Campaign-level metrics, the only operator-facing signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub campaign_id: String,
    pub status: String,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub reply_count: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Terminal failure reasons, most frequent first.
    pub failure_reasons: Vec<(String, u32)>,
}

/// A claim that outlived the staleness threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleClaim {
    pub recipient_id: String,
    pub campaign_id: String,
    pub attempt_count: u32,
    pub claimed_at: i64,
}

pub(crate) fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn opt_from_ms(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_ms)
}

fn db_err(ctx: &'static str) -> impl Fn(rusqlite::Error) -> OutreachError {
    move |e| OutreachError::Store(format!("{ctx}: {e}"))
}

fn parse_col<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = OutreachError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: OutreachError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const ACCOUNT_SELECT: &str = "SELECT id, workspace_id, platform_user_id, status, max_in_flight, last_dispatch_at, cooldown_until, created_at FROM accounts";

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        platform_user_id: row.get(2)?,
        status: parse_col(row, 3)?,
        max_in_flight: row.get(4)?,
        last_dispatch_at: opt_from_ms(row.get(5)?),
        cooldown_until: opt_from_ms(row.get(6)?),
        created_at: from_ms(row.get(7)?),
    })
}

const CAMPAIGN_SELECT: &str = "SELECT id, workspace_id, name, message_template, status, total_recipients, sent_count, reply_count, min_delay_secs, max_delay_secs, scheduled_at, created_at, updated_at, completed_at FROM campaigns";

fn row_to_campaign(row: &rusqlite::Row) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        message_template: row.get(3)?,
        status: parse_col(row, 4)?,
        total_recipients: row.get(5)?,
        sent_count: row.get(6)?,
        reply_count: row.get(7)?,
        min_delay_secs: row.get(8)?,
        max_delay_secs: row.get(9)?,
        scheduled_at: opt_from_ms(row.get(10)?),
        created_at: from_ms(row.get(11)?),
        updated_at: from_ms(row.get(12)?),
        completed_at: opt_from_ms(row.get(13)?),
    })
}

const RECIPIENT_SELECT: &str = "SELECT id, seq, campaign_id, lead_id, assigned_account_id, status, next_action_at, attempt_count, claimed_at, last_error, sent_at, replied_at, created_at FROM recipients";

fn row_to_recipient(row: &rusqlite::Row) -> rusqlite::Result<Recipient> {
    Ok(Recipient {
        id: row.get(0)?,
        seq: row.get(1)?,
        campaign_id: row.get(2)?,
        lead_id: row.get(3)?,
        assigned_account_id: row.get(4)?,
        status: parse_col(row, 5)?,
        next_action_at: opt_from_ms(row.get(6)?),
        attempt_count: row.get(7)?,
        claimed_at: opt_from_ms(row.get(8)?),
        last_error: row.get(9)?,
        sent_at: opt_from_ms(row.get(10)?),
        replied_at: opt_from_ms(row.get(11)?),
        created_at: from_ms(row.get(12)?),
    })
}

impl CampaignDb {
    /// Open or create the dispatch database.
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .map_err(db_err("DB busy timeout"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err("DB pragma"))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OutreachError::Store(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                platform_user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',   -- active, disconnected
                max_in_flight INTEGER NOT NULL DEFAULT 5,
                last_dispatch_at INTEGER,                -- epoch millis
                cooldown_until INTEGER,                  -- epoch millis
                created_at INTEGER NOT NULL
            );

            -- Owned by the lead collaborator; read at claim time only
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                handle TEXT NOT NULL,
                display_name TEXT,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                message_template TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                total_recipients INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                reply_count INTEGER NOT NULL DEFAULT 0,
                min_delay_secs INTEGER,
                max_delay_secs INTEGER,
                scheduled_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER,
                CHECK (sent_count <= total_recipients),
                CHECK (reply_count <= sent_count)
            );

            CREATE TABLE IF NOT EXISTS recipients (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                campaign_id TEXT NOT NULL,
                lead_id TEXT NOT NULL,
                assigned_account_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                next_action_at INTEGER,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                claimed_at INTEGER,
                last_error TEXT,
                sent_at INTEGER,
                replied_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE (campaign_id, lead_id),
                CHECK (status <> 'in_progress'
                       OR (assigned_account_id IS NOT NULL AND claimed_at IS NOT NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_recipients_dispatch
                ON recipients (status, next_action_at, seq);
            CREATE INDEX IF NOT EXISTS idx_recipients_account
                ON recipients (assigned_account_id, status);
            CREATE INDEX IF NOT EXISTS idx_recipients_campaign
                ON recipients (campaign_id, status);
         ",
            )
            .map_err(db_err("Migration"))?;
        Ok(())
    }

    // ─── Accounts ──────────────────────────────────────

    /// Register or update a connected account. Never revives a disconnected one.
    pub fn upsert_account(
        &self,
        id: &str,
        workspace_id: &str,
        platform_user_id: &str,
        max_in_flight: u32,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        self.lock()?
            .execute(
                "INSERT INTO accounts (id, workspace_id, platform_user_id, max_in_flight, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    workspace_id = excluded.workspace_id,
                    platform_user_id = excluded.platform_user_id,
                    max_in_flight = excluded.max_in_flight",
                params![id, workspace_id, platform_user_id, max_in_flight, to_ms(now)],
            )
            .map_err(db_err("Upsert account"))?;
        self.get_account(id)?
            .ok_or_else(|| OutreachError::NotFound(format!("account {id}")))
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        self.lock()?
            .query_row(
                &format!("{ACCOUNT_SELECT} WHERE id = ?1"),
                params![id],
                row_to_account,
            )
            .optional()
            .map_err(db_err("Get account"))
    }

    /// Mark an account disconnected. Returns false if it already was (or is unknown).
    pub fn disconnect_account(&self, id: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE accounts SET status = 'disconnected' WHERE id = ?1 AND status = 'active'",
                params![id],
            )
            .map_err(db_err("Disconnect account"))?;
        Ok(changed == 1)
    }

    /// Disconnected accounts that still own recipients.
    pub fn disconnected_accounts_with_claims(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT a.id FROM accounts a
                 JOIN recipients r ON r.assigned_account_id = a.id
                 WHERE a.status = 'disconnected' AND r.status IN ('pending', 'in_progress')
                 ORDER BY a.id",
            )
            .map_err(db_err("Prepare"))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read row"))?;
        Ok(ids)
    }

    /// Consume the account's pacing slot if its cool-down has elapsed.
    ///
    /// Compare-and-swap on the cool-down column: of several concurrent polls
    /// for the same account, at most one wins.
    pub fn reserve_dispatch_slot(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
        cooldown_until: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE accounts SET last_dispatch_at = ?2, cooldown_until = ?3
                 WHERE id = ?1 AND status = 'active'
                   AND (cooldown_until IS NULL OR cooldown_until <= ?2)",
                params![account_id, to_ms(now), to_ms(cooldown_until)],
            )
            .map_err(db_err("Reserve dispatch slot"))?;
        Ok(changed == 1)
    }

    /// Undo a reservation that produced no claims, restoring the prior pacing state.
    pub fn release_dispatch_slot(&self, account: &Account, reserved_until: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE accounts SET last_dispatch_at = ?2, cooldown_until = ?3
                 WHERE id = ?1 AND cooldown_until = ?4",
                params![
                    account.id,
                    account.last_dispatch_at.map(to_ms),
                    account.cooldown_until.map(to_ms),
                    to_ms(reserved_until),
                ],
            )
            .map_err(db_err("Release dispatch slot"))?;
        Ok(changed == 1)
    }

    /// Replace a reserved cool-down with the one drawn for the claimed batch.
    pub fn settle_cooldown(
        &self,
        account_id: &str,
        reserved_until: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE accounts SET cooldown_until = ?3 WHERE id = ?1 AND cooldown_until = ?2",
                params![account_id, to_ms(reserved_until), to_ms(until)],
            )
            .map_err(db_err("Settle cooldown"))?;
        Ok(changed == 1)
    }

    pub fn count_in_flight(&self, account_id: &str) -> Result<u32> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM recipients WHERE assigned_account_id = ?1 AND status = 'in_progress'",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(db_err("Count in flight"))
    }

    // ─── Leads ──────────────────────────────────────

    pub fn upsert_lead(&self, lead: &Lead, now: DateTime<Utc>) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO leads (id, workspace_id, handle, display_name, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    workspace_id = excluded.workspace_id,
                    handle = excluded.handle,
                    display_name = excluded.display_name,
                    updated_at = excluded.updated_at",
                params![lead.id, lead.workspace_id, lead.handle, lead.display_name, to_ms(now)],
            )
            .map_err(db_err("Upsert lead"))?;
        Ok(())
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        self.lock()?
            .query_row(
                "SELECT id, workspace_id, handle, display_name FROM leads WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Lead {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        handle: row.get(2)?,
                        display_name: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err("Get lead"))
    }

    // ─── Campaigns ──────────────────────────────────────

    /// Build a draft campaign and all of its recipients in one transaction.
    ///
    /// Duplicate lead ids collapse to one recipient; ids with no lead record
    /// in the campaign's workspace are dropped.
    pub fn create_campaign(
        &self,
        draft: &NewCampaign,
        lead_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Campaign> {
        let id = uuid::Uuid::new_v4().to_string();
        let now_ms = to_ms(now);
        {
            let mut conn = self.lock()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err("Begin"))?;

            tx.execute(
                "INSERT INTO campaigns (id, workspace_id, name, message_template, min_delay_secs, max_delay_secs, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id,
                    draft.workspace_id,
                    draft.name,
                    draft.message_template,
                    draft.min_delay_secs,
                    draft.max_delay_secs,
                    now_ms,
                ],
            )
            .map_err(db_err("Insert campaign"))?;

            let mut seen = HashSet::new();
            let mut total = 0u32;
            {
                let mut insert = tx
                    .prepare(
                        "INSERT INTO recipients (id, campaign_id, lead_id, created_at)
                         SELECT ?1, ?2, l.id, ?4 FROM leads l WHERE l.id = ?3 AND l.workspace_id = ?5",
                    )
                    .map_err(db_err("Prepare recipients"))?;
                for lead_id in lead_ids.iter().filter(|l| seen.insert(l.as_str())) {
                    let rid = uuid::Uuid::new_v4().to_string();
                    let inserted = insert
                        .execute(params![rid, id, lead_id, now_ms, draft.workspace_id])
                        .map_err(db_err("Insert recipient"))?;
                    if inserted == 0 {
                        tracing::warn!("Lead '{lead_id}' not found in workspace '{}', skipped", draft.workspace_id);
                    }
                    total += inserted as u32;
                }
            }

            tx.execute(
                "UPDATE campaigns SET total_recipients = ?2 WHERE id = ?1",
                params![id, total],
            )
            .map_err(db_err("Set total"))?;
            tx.commit().map_err(db_err("Commit"))?;
        }

        self.get_campaign(&id)?
            .ok_or_else(|| OutreachError::NotFound(format!("campaign {id}")))
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        self.lock()?
            .query_row(
                &format!("{CAMPAIGN_SELECT} WHERE id = ?1"),
                params![id],
                row_to_campaign,
            )
            .optional()
            .map_err(db_err("Get campaign"))
    }

    /// Compare-and-swap the campaign status to `to` from any legal predecessor.
    pub fn transition_campaign(&self, id: &str, to: CampaignStatus, now: DateTime<Utc>) -> Result<bool> {
        let sources = sql_in(campaign_sources(to), CampaignStatus::as_str);
        if sources.is_empty() {
            return Ok(false);
        }
        let completed_at = (to == CampaignStatus::Completed).then(|| to_ms(now));
        let changed = self
            .lock()?
            .execute(
                &format!(
                    "UPDATE campaigns SET status = ?2, updated_at = ?3, completed_at = COALESCE(?4, completed_at)
                     WHERE id = ?1 AND status IN ({sources})"
                ),
                params![id, to.as_str(), to_ms(now), completed_at],
            )
            .map_err(db_err("Transition campaign"))?;
        Ok(changed == 1)
    }

    /// DRAFT → SCHEDULED with a start time.
    pub fn schedule_campaign(&self, id: &str, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE campaigns SET status = 'scheduled', scheduled_at = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'draft'",
                params![id, to_ms(at), to_ms(now)],
            )
            .map_err(db_err("Schedule campaign"))?;
        Ok(changed == 1)
    }

    /// SCHEDULED → RUNNING once the start time has passed.
    pub fn promote_scheduled(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE campaigns SET status = 'running', updated_at = ?2
                 WHERE id = ?1 AND status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?2",
                params![id, to_ms(now)],
            )
            .map_err(db_err("Promote scheduled"))?;
        Ok(changed == 1)
    }

    /// RUNNING → COMPLETED iff no pending or in-progress recipient remains.
    /// One statement, so the emptiness check and the flip cannot interleave.
    pub fn complete_if_drained(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let open = open_recipient_statuses();
        let changed = self
            .lock()?
            .execute(
                &format!(
                    "UPDATE campaigns SET status = 'completed', updated_at = ?2, completed_at = ?2
                     WHERE id = ?1 AND status = 'running'
                       AND NOT EXISTS (
                           SELECT 1 FROM recipients
                           WHERE campaign_id = ?1 AND status IN ({open}))"
                ),
                params![id, to_ms(now)],
            )
            .map_err(db_err("Complete campaign"))?;
        Ok(changed == 1)
    }

    /// Cancel a campaign and skip every recipient that has not finished.
    pub fn cancel_campaign(&self, id: &str, now: DateTime<Utc>) -> Result<Option<usize>> {
        let sources = sql_in(campaign_sources(CampaignStatus::Cancelled), CampaignStatus::as_str);
        let skip = RecipientEvent::Skip;
        let (guard, set, attempts) = (skip.guard_sql(), skip.set_sql(), skip.attempt_sql());
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Begin"))?;
        let changed = tx
            .execute(
                &format!(
                    "UPDATE campaigns SET status = 'cancelled', updated_at = ?2
                     WHERE id = ?1 AND status IN ({sources})"
                ),
                params![id, to_ms(now)],
            )
            .map_err(db_err("Cancel campaign"))?;
        if changed == 0 {
            return Ok(None);
        }
        let skipped = tx
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {set},
                        attempt_count = {attempts},
                        claimed_at = NULL,
                        next_action_at = NULL,
                        last_error = COALESCE(last_error, 'campaign cancelled')
                     WHERE campaign_id = ?1 AND {guard}"
                ),
                params![id],
            )
            .map_err(db_err("Skip recipients"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(Some(skipped))
    }

    pub fn campaign_stats(&self, id: &str) -> Result<Option<CampaignStats>> {
        let Some(campaign) = self.get_campaign(id)? else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let mut stats = CampaignStats {
            campaign_id: campaign.id.clone(),
            status: campaign.status.to_string(),
            total_recipients: campaign.total_recipients,
            sent_count: campaign.sent_count,
            reply_count: campaign.reply_count,
            ..Default::default()
        };

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM recipients WHERE campaign_id = ?1 GROUP BY status")
            .map_err(db_err("Prepare"))?;
        let rows = stmt
            .query_map(params![id], |row| Ok((parse_col::<RecipientStatus>(row, 0)?, row.get::<_, u32>(1)?)))
            .map_err(db_err("Query"))?;
        for row in rows {
            let (status, count) = row.map_err(db_err("Read row"))?;
            match status {
                RecipientStatus::Pending => stats.pending = count,
                RecipientStatus::InProgress => stats.in_progress = count,
                RecipientStatus::Sent => stats.sent = count,
                RecipientStatus::Failed => stats.failed = count,
                RecipientStatus::Skipped => stats.skipped = count,
            }
        }

        let mut stmt = conn
            .prepare(
                "SELECT last_error, COUNT(*) AS n FROM recipients
                 WHERE campaign_id = ?1 AND status = 'failed' AND last_error IS NOT NULL
                 GROUP BY last_error ORDER BY n DESC, last_error LIMIT 10",
            )
            .map_err(db_err("Prepare"))?;
        stats.failure_reasons = stmt
            .query_map(params![id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read row"))?;
        Ok(Some(stats))
    }

    // ─── Recipients ──────────────────────────────────────

    pub fn get_recipient(&self, id: &str) -> Result<Option<Recipient>> {
        self.lock()?
            .query_row(
                &format!("{RECIPIENT_SELECT} WHERE id = ?1"),
                params![id],
                row_to_recipient,
            )
            .optional()
            .map_err(db_err("Get recipient"))
    }

    /// Recipients of a campaign in creation order.
    pub fn list_recipients(&self, campaign_id: &str) -> Result<Vec<Recipient>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{RECIPIENT_SELECT} WHERE campaign_id = ?1 ORDER BY seq"))
            .map_err(db_err("Prepare"))?;
        let recipients = stmt
            .query_map(params![campaign_id], row_to_recipient)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read row"))?;
        Ok(recipients)
    }

    /// Ids of recipients the account could claim right now, dispatch order.
    ///
    /// Eligible: pending, due, campaign running in the account's workspace,
    /// and either unassigned or already stuck to this account.
    pub fn eligible_recipients(&self, account: &Account, now: DateTime<Utc>, limit: u32) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.id FROM recipients r
                 JOIN campaigns c ON c.id = r.campaign_id
                 WHERE r.status = 'pending'
                   AND (r.next_action_at IS NULL OR r.next_action_at <= ?2)
                   AND c.status = 'running'
                   AND c.workspace_id = ?3
                   AND (r.assigned_account_id IS NULL OR r.assigned_account_id = ?1)
                 ORDER BY COALESCE(r.next_action_at, 0), r.seq
                 LIMIT ?4",
            )
            .map_err(db_err("Prepare"))?;
        let ids = stmt
            .query_map(params![account.id, to_ms(now), account.workspace_id, limit], |row| {
                row.get::<_, String>(0)
            })
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read row"))?;
        Ok(ids)
    }

    pub fn count_eligible(&self, account: &Account, now: DateTime<Utc>) -> Result<u32> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM recipients r
                 JOIN campaigns c ON c.id = r.campaign_id
                 WHERE r.status = 'pending'
                   AND (r.next_action_at IS NULL OR r.next_action_at <= ?2)
                   AND c.status = 'running'
                   AND c.workspace_id = ?3
                   AND (r.assigned_account_id IS NULL OR r.assigned_account_id = ?1)",
                params![account.id, to_ms(now), account.workspace_id],
                |row| row.get(0),
            )
            .map_err(db_err("Count eligible"))
    }

    /// PENDING → IN_PROGRESS for one recipient, or nothing if another poller won.
    ///
    /// The account must still be active when the update runs, so a disconnect
    /// that lands mid-poll cannot be followed by a fresh claim.
    pub fn claim_recipient(&self, recipient_id: &str, account_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let claim = RecipientEvent::Claim;
        let (guard, set, attempts) = (claim.guard_sql(), claim.set_sql(), claim.attempt_sql());
        let changed = self
            .lock()?
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {set},
                        assigned_account_id = ?2,
                        attempt_count = {attempts},
                        claimed_at = ?3
                     WHERE id = ?1 AND {guard}
                       AND (assigned_account_id IS NULL OR assigned_account_id = ?2)
                       AND (next_action_at IS NULL OR next_action_at <= ?3)
                       AND EXISTS (SELECT 1 FROM campaigns c
                                   WHERE c.id = recipients.campaign_id AND c.status = 'running')
                       AND EXISTS (SELECT 1 FROM accounts a
                                   WHERE a.id = ?2 AND a.status = 'active')"
                ),
                params![recipient_id, account_id, to_ms(now)],
            )
            .map_err(db_err("Claim recipient"))?;
        Ok(changed == 1)
    }

    /// IN_PROGRESS → SENT and bump the campaign counter, atomically.
    ///
    /// `account_id`, when given, must own the claim. Returns false for
    /// duplicate or foreign reports.
    pub fn deliver_recipient(&self, recipient_id: &str, account_id: Option<&str>, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Begin"))?;
        let deliver = RecipientEvent::Deliver;
        let changed = tx
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {}, sent_at = ?3, claimed_at = NULL, next_action_at = NULL
                     WHERE id = ?1 AND {}
                       AND (?2 IS NULL OR assigned_account_id = ?2)",
                    deliver.set_sql(),
                    deliver.guard_sql()
                ),
                params![recipient_id, account_id, to_ms(now)],
            )
            .map_err(db_err("Deliver recipient"))?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE campaigns SET sent_count = sent_count + 1, updated_at = ?2
             WHERE id = (SELECT campaign_id FROM recipients WHERE id = ?1)
               AND sent_count < total_recipients",
            params![recipient_id, to_ms(now)],
        )
        .map_err(db_err("Increment sent"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(true)
    }

    /// IN_PROGRESS → PENDING with a new eligibility time; sticky owner kept.
    ///
    /// Guarded on the attempt number the caller decided on, so a concurrent
    /// reclaim and report cannot both apply.
    pub fn retry_recipient(
        &self,
        recipient_id: &str,
        expected_attempt: u32,
        next_action_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {}, next_action_at = ?3, claimed_at = NULL, last_error = ?4
                     WHERE id = ?1 AND {} AND attempt_count = ?2",
                    RecipientEvent::Retry.set_sql(),
                    RecipientEvent::Retry.guard_sql()
                ),
                params![recipient_id, expected_attempt, to_ms(next_action_at), reason],
            )
            .map_err(db_err("Retry recipient"))?;
        Ok(changed == 1)
    }

    /// IN_PROGRESS → FAILED, permanently.
    pub fn fail_recipient(&self, recipient_id: &str, expected_attempt: u32, reason: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {}, next_action_at = NULL, claimed_at = NULL, last_error = ?3
                     WHERE id = ?1 AND {} AND attempt_count = ?2",
                    RecipientEvent::Fail.set_sql(),
                    RecipientEvent::Fail.guard_sql()
                ),
                params![recipient_id, expected_attempt, reason],
            )
            .map_err(db_err("Fail recipient"))?;
        Ok(changed == 1)
    }

    /// → SKIPPED without attempt penalty. `account_id`, when given, must own the claim.
    pub fn skip_recipient(&self, recipient_id: &str, account_id: Option<&str>, reason: &str) -> Result<bool> {
        let skip = RecipientEvent::Skip;
        let (guard, set, attempts) = (skip.guard_sql(), skip.set_sql(), skip.attempt_sql());
        let changed = self
            .lock()?
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {set},
                        attempt_count = {attempts},
                        claimed_at = NULL, next_action_at = NULL, last_error = ?3
                     WHERE id = ?1 AND {guard}
                       AND (?2 IS NULL OR assigned_account_id = ?2)"
                ),
                params![recipient_id, account_id, reason],
            )
            .map_err(db_err("Skip recipient"))?;
        Ok(changed == 1)
    }

    /// Hand back every claim held by an account and drop its sticky bindings.
    ///
    /// Released claims do not count toward the retry ceiling. Returns the
    /// number of in-progress recipients released.
    pub fn release_account(&self, account_id: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Begin"))?;
        let release = RecipientEvent::Release;
        let released = tx
            .execute(
                &format!(
                    "UPDATE recipients SET
                        {}, assigned_account_id = NULL, claimed_at = NULL,
                        attempt_count = {}
                     WHERE assigned_account_id = ?1 AND {}",
                    release.set_sql(),
                    release.attempt_sql(),
                    release.guard_sql()
                ),
                params![account_id],
            )
            .map_err(db_err("Release claims"))?;
        tx.execute(
            "UPDATE recipients SET assigned_account_id = NULL
             WHERE assigned_account_id = ?1 AND status = 'pending'",
            params![account_id],
        )
        .map_err(db_err("Unstick pending"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(released)
    }

    /// In-progress claims stamped before `cutoff`, optionally for one campaign.
    pub fn stale_claims(&self, cutoff: DateTime<Utc>, campaign_id: Option<&str>) -> Result<Vec<StaleClaim>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, campaign_id, attempt_count, claimed_at FROM recipients
                 WHERE status = 'in_progress' AND claimed_at < ?1
                   AND (?2 IS NULL OR campaign_id = ?2)
                 ORDER BY claimed_at",
            )
            .map_err(db_err("Prepare"))?;
        let claims = stmt
            .query_map(params![to_ms(cutoff), campaign_id], |row| {
                Ok(StaleClaim {
                    recipient_id: row.get(0)?,
                    campaign_id: row.get(1)?,
                    attempt_count: row.get(2)?,
                    claimed_at: row.get(3)?,
                })
            })
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read row"))?;
        Ok(claims)
    }

    /// Mark a sent recipient as replied and bump the campaign reply counter once.
    pub fn record_reply(&self, recipient_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Begin"))?;
        let changed = tx
            .execute(
                "UPDATE recipients SET replied_at = ?2
                 WHERE id = ?1 AND status = 'sent' AND replied_at IS NULL",
                params![recipient_id, to_ms(now)],
            )
            .map_err(db_err("Record reply"))?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE campaigns SET reply_count = reply_count + 1, updated_at = ?2
             WHERE id = (SELECT campaign_id FROM recipients WHERE id = ?1)
               AND reply_count < sent_count",
            params![recipient_id, to_ms(now)],
        )
        .map_err(db_err("Increment replies"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(true)
    }
}
