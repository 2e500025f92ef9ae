//! # Outreach Core
//!
//! Shared vocabulary for the campaign dispatcher: domain records, status
//! enums, configuration and the error type every crate returns.

pub mod config;
pub mod error;
pub mod types;

pub use config::OutreachConfig;
pub use error::{OutreachError, Result};
pub use types::{
    Account, AccountStatus, Campaign, CampaignStatus, Job, Lead, Outcome, Recipient,
    RecipientStatus,
};
