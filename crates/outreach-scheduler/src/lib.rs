//! # Outreach Scheduler
//!
//! Dispatch core for outbound message campaigns. Remote workers poll for
//! jobs scoped to one connected account, send the message, and report the
//! outcome back. Nothing runs in the background: every decision is made
//! inside a request and persisted before it returns.
//!
//! ## Architecture
//! ```text
//! GET /jobs ──► assigner ──► pacing gate (CAS on account)
//!                  │          └─► claim CAS per recipient ──► template
//!                  ▼
//!              CampaignDb (SQLite, WAL)
//!                  ▲
//! POST report ─► reconciler ──► retry policy ──► completion check
//! POST process ─► orchestrator ──► promote / sweep / complete
//! POST sweep ──► sweep (stale claims, disconnected accounts)
//! ```

pub mod assigner;
pub mod engine;
pub mod lifecycle;
pub mod orchestrator;
pub mod pacing;
pub mod persistence;
pub mod policy;
pub mod reconciler;
pub mod retry;
pub mod sweep;
pub mod template;

pub use engine::DispatchEngine;
pub use pacing::Pacing;
pub use persistence::{CampaignDb, CampaignStats, NewCampaign};
pub use policy::DispatchPolicy;
pub use reconciler::ReportResult;
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use sweep::SweepReport;
