//! Domain records — campaigns, recipients, accounts, leads and the job
//! projection handed to remote workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OutreachError;

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled campaigns never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = OutreachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(OutreachError::InvalidInput(format!(
                "unknown campaign status '{other}'"
            ))),
        }
    }
}

/// Per-recipient send status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    InProgress,
    Sent,
    Failed,
    Skipped,
}

impl RecipientStatus {
    pub const ALL: [RecipientStatus; 5] = [
        RecipientStatus::Pending,
        RecipientStatus::InProgress,
        RecipientStatus::Sent,
        RecipientStatus::Failed,
        RecipientStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::InProgress => "in_progress",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
            RecipientStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecipientStatus::Sent | RecipientStatus::Failed | RecipientStatus::Skipped
        )
    }
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientStatus {
    type Err = OutreachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "in_progress" => Ok(RecipientStatus::InProgress),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            "skipped" => Ok(RecipientStatus::Skipped),
            other => Err(OutreachError::InvalidInput(format!(
                "unknown recipient status '{other}'"
            ))),
        }
    }
}

/// Connection health of a platform account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disconnected => "disconnected",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = OutreachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "disconnected" => Ok(AccountStatus::Disconnected),
            other => Err(OutreachError::InvalidInput(format!(
                "unknown account status '{other}'"
            ))),
        }
    }
}

/// A bulk outreach unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// Message body with `{{placeholder}}` slots, rendered at claim time.
    pub message_template: String,
    pub status: CampaignStatus,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub reply_count: u32,
    /// Optional pacing window override (seconds).
    pub min_delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
    /// Start time for scheduled campaigns.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One target identity plus its per-campaign send state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    /// Insertion order, used as the FIFO tie-breaker.
    pub seq: i64,
    pub campaign_id: String,
    pub lead_id: String,
    /// Sticky owner once first claimed.
    pub assigned_account_id: Option<String>,
    pub status: RecipientStatus,
    /// `None` or a past instant means immediately eligible.
    pub next_action_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A connected social-platform identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub workspace_id: String,
    pub platform_user_id: String,
    pub status: AccountStatus,
    /// Maximum recipients this account may hold in progress at once.
    pub max_in_flight: u32,
    pub last_dispatch_at: Option<DateTime<Utc>>,
    /// No new claims are handed out before this instant.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Target identity record owned by the lead collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub workspace_id: String,
    /// Platform handle, e.g. `jane.doe`.
    pub handle: String,
    pub display_name: Option<String>,
}

impl Lead {
    pub fn new(id: &str, workspace_id: &str, handle: &str) -> Self {
        Self {
            id: id.to_string(),
            workspace_id: workspace_id.to_string(),
            handle: handle.to_string(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }
}

/// A claim over exactly one recipient, scoped to one account.
/// Never persisted. Projected from the recipient row at claim time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub recipient_id: String,
    pub campaign_id: String,
    pub account_id: String,
    pub message: String,
    pub recipient_handle: String,
    pub attempt: u32,
}

/// Result of executing a job, as reported by a remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure {
        #[serde(default)]
        reason: String,
    },
    Skipped,
}
