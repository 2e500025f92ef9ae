//! # Outreach Gateway
//!
//! HTTP surface for the dispatch engine: the worker polling contract
//! (`GET /jobs`, `POST /jobs/{id}/report`), campaign lifecycle commands,
//! stats and the collaborator boundary for accounts and leads.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
