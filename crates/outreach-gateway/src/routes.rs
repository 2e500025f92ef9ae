//! API route handlers for the gateway.
//!
//! Every handler pushes its store work onto the blocking pool and waits at
//! most `op_timeout` for it. A store failure or a missed deadline comes back
//! as `503 {"ok": false, "retryable": true}` so workers know to try again.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use outreach_core::error::OutreachError;
use outreach_core::types::{Lead, Outcome};
use outreach_scheduler::{DispatchEngine, NewCampaign};
use serde::Deserialize;
use serde_json::{Value, json};

use super::server::AppState;

type ApiResponse = (StatusCode, Json<Value>);

/// Run a store operation off the async runtime, bounded by the configured deadline.
async fn run<T, F>(state: &AppState, op: &'static str, f: F) -> Result<T, OutreachError>
where
    T: Send + 'static,
    F: FnOnce(&DispatchEngine) -> outreach_core::Result<T> + Send + 'static,
{
    let engine = state.engine.clone();
    let task = tokio::task::spawn_blocking(move || f(&engine));
    match tokio::time::timeout(state.op_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(OutreachError::Store(format!("{op}: task failed: {e}"))),
        Err(_) => Err(OutreachError::Timeout(format!(
            "{op} exceeded {}ms",
            state.op_timeout.as_millis()
        ))),
    }
}

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn error_response(e: OutreachError) -> ApiResponse {
    let status = match &e {
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        OutreachError::NotFound(_) => StatusCode::NOT_FOUND,
        OutreachError::InvalidTransition { .. } => StatusCode::CONFLICT,
        OutreachError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("❌ {e}");
    }
    (
        status,
        Json(json!({
            "ok": false,
            "success": false,
            "error": e.to_string(),
            "retryable": e.is_retryable(),
        })),
    )
}

fn respond<T>(result: Result<T, OutreachError>, body: impl FnOnce(T) -> Value) -> ApiResponse {
    match result {
        Ok(v) => ok(body(v)),
        Err(e) => error_response(e),
    }
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "outreach-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// ─── Polling contract ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsQuery {
    pub account_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub peek: bool,
}

/// `GET /jobs?accountId=..` — claim a batch, or count with `peek=true`.
pub async fn poll_jobs(State(state): State<Arc<AppState>>, Query(q): Query<JobsQuery>) -> ApiResponse {
    let account_id = q.account_id;
    if q.peek {
        let result = run(&state, "peek", move |e| e.peek(&account_id)).await;
        return respond(result, |count| json!({ "ok": true, "count": count }));
    }
    let limit = q.limit;
    let result = run(&state, "poll", move |e| e.poll(&account_id, limit)).await;
    respond(result, |jobs| json!({ "ok": true, "count": jobs.len(), "jobs": jobs }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportBody {
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default)]
    pub account_id: Option<String>,
}

/// `POST /jobs/{id}/report` — duplicate or stale reports still answer success.
pub async fn report_job(
    State(state): State<Arc<AppState>>,
    Path(recipient_id): Path<String>,
    Json(body): Json<ReportBody>,
) -> ApiResponse {
    let result = run(&state, "report", move |e| {
        e.report(&recipient_id, body.account_id.as_deref(), &body.outcome)
    })
    .await;
    respond(result, |r| json!({ "ok": true, "success": true, "result": r }))
}

// ─── Campaigns ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignReq {
    pub workspace_id: String,
    pub name: String,
    pub message_template: String,
    #[serde(default)]
    pub min_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
    pub lead_ids: Vec<String>,
}

pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCampaignReq>,
) -> ApiResponse {
    let draft = NewCampaign {
        workspace_id: req.workspace_id,
        name: req.name,
        message_template: req.message_template,
        min_delay_secs: req.min_delay_secs,
        max_delay_secs: req.max_delay_secs,
    };
    let lead_ids = req.lead_ids;
    let result = run(&state, "create campaign", move |e| e.create_campaign(&draft, &lead_ids)).await;
    respond(result, |c| json!({ "ok": true, "success": true, "campaign": c }))
}

pub async fn get_campaign(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let lookup = id.clone();
    let result = run(&state, "get campaign", move |e| e.db().get_campaign(&lookup)).await;
    match result {
        Ok(Some(c)) => ok(json!({ "ok": true, "campaign": c })),
        Ok(None) => error_response(OutreachError::NotFound(format!("campaign {id}"))),
        Err(e) => error_response(e),
    }
}

/// `POST /campaigns/{id}/process` — one idempotent orchestration pass.
pub async fn process_campaign(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "process", move |e| e.process(&id)).await;
    respond(result, |s| json!({ "ok": true, "success": true, "status": s }))
}

pub async fn start_campaign(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "start", move |e| e.start(&id)).await;
    respond(result, |s| json!({ "ok": true, "success": true, "status": s }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReq {
    pub scheduled_at: DateTime<Utc>,
}

pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ScheduleReq>,
) -> ApiResponse {
    let result = run(&state, "schedule", move |e| e.schedule(&id, req.scheduled_at)).await;
    respond(result, |s| json!({ "ok": true, "success": true, "status": s }))
}

pub async fn pause_campaign(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "pause", move |e| e.pause(&id)).await;
    respond(result, |s| json!({ "ok": true, "success": true, "status": s }))
}

pub async fn resume_campaign(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "resume", move |e| e.resume(&id)).await;
    respond(result, |s| json!({ "ok": true, "success": true, "status": s }))
}

pub async fn cancel_campaign(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "cancel", move |e| e.cancel(&id)).await;
    respond(result, |s| json!({ "ok": true, "success": true, "status": s }))
}

pub async fn campaign_stats(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let lookup = id.clone();
    let result = run(&state, "stats", move |e| e.stats(&lookup)).await;
    match result {
        Ok(Some(stats)) => ok(json!({ "ok": true, "stats": stats })),
        Ok(None) => error_response(OutreachError::NotFound(format!("campaign {id}"))),
        Err(e) => error_response(e),
    }
}

pub async fn record_reply(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "reply", move |e| e.record_reply(&id)).await;
    respond(result, |recorded| json!({ "ok": true, "success": true, "recorded": recorded }))
}

// ─── Collaborator boundary ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAccountReq {
    pub id: String,
    pub workspace_id: String,
    pub platform_user_id: String,
    #[serde(default)]
    pub max_in_flight: Option<u32>,
}

pub async fn register_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterAccountReq>,
) -> ApiResponse {
    let result = run(&state, "register account", move |e| {
        e.register_account(&req.id, &req.workspace_id, &req.platform_user_id, req.max_in_flight)
    })
    .await;
    respond(result, |a| json!({ "ok": true, "success": true, "account": a }))
}

pub async fn disconnect_account(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let result = run(&state, "disconnect", move |e| e.disconnect_account(&id)).await;
    respond(result, |released| json!({ "ok": true, "success": true, "released": released }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertLeadReq {
    pub id: String,
    pub workspace_id: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

pub async fn upsert_lead(State(state): State<Arc<AppState>>, Json(req): Json<UpsertLeadReq>) -> ApiResponse {
    let lead = Lead {
        id: req.id,
        workspace_id: req.workspace_id,
        handle: req.handle,
        display_name: req.display_name,
    };
    let result = run(&state, "upsert lead", move |e| e.upsert_lead(&lead)).await;
    respond(result, |()| json!({ "ok": true, "success": true }))
}

/// `POST /sweep` — global stale-claim and disconnected-account sweep.
pub async fn sweep(State(state): State<Arc<AppState>>) -> ApiResponse {
    let result = run(&state, "sweep", |e| e.sweep()).await;
    respond(result, |report| json!({ "ok": true, "success": true, "report": report }))
}
