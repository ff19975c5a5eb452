//! HTTP handler functions for the endpoint table in spec.md §6.1.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::HandoffStatus;
use crate::errors::JarvisError;
use crate::webhook::WebhookEnvelope;

use super::AppState;

/// POST /webhook — per spec.md §6.1, must respond within ~100ms. Each
/// normalized alert is handed to the pipeline in a detached task; if the
/// store happens to be down, the alert falls back onto the in-memory
/// queue for the periodic drain task to retry instead of being dropped.
pub async fn webhook(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> Json<Value> {
    for alert in envelope.into_alerts() {
        let pipeline = state.pipeline.clone();
        let queue = state.queue.clone();
        tokio::spawn(async move {
            let alert_name = alert.alert_name().to_string();
            match pipeline.process_alert(alert.clone()).await {
                Ok(outcome) => {
                    tracing::info!(alert_name, ?outcome, "alert processed");
                }
                Err(JarvisError::StoreUnavailable(reason)) => {
                    tracing::warn!(alert_name, reason, "store unavailable, queuing alert for retry");
                    queue.push(alert).await;
                }
                Err(e) => {
                    tracing::error!(alert_name, error = %e, "alert processing failed");
                }
            }
        });
    }
    Json(json!({"status": "ok"}))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db: bool,
    pub queue_depth: usize,
    pub version: &'static str,
}

/// GET /health — `degraded` means the store is unreachable but the queue
/// is still absorbing inbound alerts.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.store.analytics_summary().await.is_ok();
    let queue_depth = state.queue.len().await;
    let status = if db { "healthy" } else { "degraded" };
    Json(HealthResponse { status, db, queue_depth, version: env!("CARGO_PKG_VERSION") })
}

#[derive(Deserialize)]
pub struct PatternsQuery {
    min_confidence: Option<f64>,
    limit: Option<i64>,
}

/// GET /patterns?min_confidence&limit — sorted by confidence descending.
pub async fn list_patterns(
    State(state): State<AppState>,
    Query(query): Query<PatternsQuery>,
) -> Result<Json<Value>, JarvisError> {
    let min_confidence = query.min_confidence.unwrap_or(0.0);
    let limit = query.limit.unwrap_or(50);
    let patterns = state.store.list_patterns(min_confidence, limit).await?;
    Ok(Json(json!(patterns)))
}

/// GET /patterns/{id} — 404 if the pattern doesn't exist.
pub async fn get_pattern(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, JarvisError> {
    let pattern = state.store.get_pattern(id).await?.ok_or(JarvisError::NotFound)?;
    Ok(Json(json!(pattern)))
}

/// GET /analytics — 30-day rollup.
pub async fn analytics(State(state): State<AppState>) -> Result<Json<Value>, JarvisError> {
    let summary = state.store.analytics_summary().await?;
    Ok(Json(json!(summary)))
}

#[derive(Deserialize)]
pub struct MaintenanceStartRequest {
    reason: String,
    duration_minutes: Option<i64>,
}

/// POST /maintenance/start — opens a window from now until
/// `duration_minutes` out (defaulting to the suppression TTL).
pub async fn maintenance_start(
    State(state): State<AppState>,
    Json(body): Json<MaintenanceStartRequest>,
) -> Result<Json<Value>, JarvisError> {
    let duration = body
        .duration_minutes
        .unwrap_or(crate::constants::defaults::SUPPRESSION_TTL_MINUTES);
    let start = Utc::now();
    let end = start + Duration::minutes(duration);
    let window_id = state
        .store
        .create_maintenance_window(start, end, &body.reason, "api")
        .await?;
    Ok(Json(json!({"window_id": window_id})))
}

#[derive(Deserialize)]
pub struct MaintenanceEndRequest {
    window_id: i64,
}

/// POST /maintenance/end — ends a window by id.
pub async fn maintenance_end(
    State(state): State<AppState>,
    Json(body): Json<MaintenanceEndRequest>,
) -> Result<Json<Value>, JarvisError> {
    let deleted = state.store.delete_maintenance_window(body.window_id).await?;
    if !deleted {
        return Err(JarvisError::NotFound);
    }
    Ok(Json(json!({"ok": true})))
}

/// GET /maintenance/status — whether a window is active right now, plus
/// the full list for operator visibility.
pub async fn maintenance_status(State(state): State<AppState>) -> Result<Json<Value>, JarvisError> {
    let active = state.store.in_maintenance_window(Utc::now()).await?;
    let windows = state.store.list_maintenance_windows().await?;
    Ok(Json(json!({"active": active, "windows": windows})))
}

#[derive(Deserialize)]
pub struct SelfRestartRequest {
    target: String,
    reason: String,
    #[serde(default)]
    context: Value,
    ssh_host: Option<String>,
}

/// POST /self-restart — 409 if a handoff is already active, per the
/// single-active-handoff invariant enforced at the Store layer.
pub async fn self_restart(
    State(state): State<AppState>,
    Json(body): Json<SelfRestartRequest>,
) -> Result<Json<Value>, JarvisError> {
    let handoff_id = state
        .self_preserver
        .initiate(&body.target, &body.reason, body.context, body.ssh_host.as_deref())
        .await?;
    Ok(Json(json!({"handoff_id": handoff_id})))
}

/// GET /self-restart/status
pub async fn self_restart_status(State(state): State<AppState>) -> Result<Json<Value>, JarvisError> {
    let current = state.self_preserver.current_handoff().await?;
    Ok(Json(json!({"current_handoff": current})))
}

#[derive(Deserialize)]
pub struct CancelQuery {
    handoff_id: String,
    reason: Option<String>,
}

/// POST /self-restart/cancel?handoff_id&reason
pub async fn self_restart_cancel(
    State(state): State<AppState>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<Value>, JarvisError> {
    state
        .self_preserver
        .cancel(&query.handoff_id, query.reason.as_deref())
        .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct ResumeQuery {
    handoff_id: String,
    status: String,
    error: Option<String>,
}

/// POST /resume?handoff_id&status[&error] — called by the external
/// restart orchestrator once it knows the outcome.
pub async fn resume(
    State(state): State<AppState>,
    Query(query): Query<ResumeQuery>,
) -> Result<Json<Value>, JarvisError> {
    let status = HandoffStatus::parse(&query.status);
    state
        .self_preserver
        .resume(&query.handoff_id, status, query.error.as_deref())
        .await?;
    Ok(Json(json!({"ok": true})))
}
