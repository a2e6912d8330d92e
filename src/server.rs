//! HTTP surface of the coordinator: run management for operators, work
//! dispatch for crawl workers, and the maintenance hook.
//!
//! Operator endpoints accept an optional `runId` (body field, or query
//! parameter on GETs) defaulting to `"default"`; worker endpoints carry it
//! in their payloads. Auth and CORS belong to the deployment front, not to
//! this router.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize as SerdeDeserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::coordinator::{ResultReport, RunCoordinator};
use crate::error::ApiError;
use crate::registry::RunRegistry;
use crate::run_state::RunStatus;
use crate::stores::{blob_key, BlobStore, PageMetadataStore};
use crate::url_utils;

pub const DEFAULT_RUN_ID: &str = "default";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RunRegistry>,
    pub blobs: Arc<dyn BlobStore>,
    pub pages: Arc<dyn PageMetadataStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/seed", post(seed))
        .route("/configure", post(configure))
        .route("/start", post(start))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/cancel", post(cancel))
        .route("/reset", post(reset))
        .route("/stats", get(stats))
        .route("/status", get(status))
        .route("/request-work", post(request_work))
        .route("/report-result", post(report_result))
        .route("/on-cron", post(on_cron))
        .with_state(state)
}

/// Drive the maintenance tick from an embedded timer. An interval of 0
/// leaves maintenance entirely to the external `/on-cron` caller.
pub fn spawn_maintenance_ticker(
    registry: Arc<RunRegistry>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if interval_secs == 0 {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let queue_size = registry.tick_all().await;
            debug!(queue_size, "maintenance tick");
        }
    })
}

fn run_id_or_default(explicit: Option<String>) -> String {
    match explicit {
        Some(id) if !id.is_empty() => id,
        _ => DEFAULT_RUN_ID.to_string(),
    }
}

#[derive(Debug, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
struct SeedRequest {
    run_id: Option<String>,
    urls: Vec<String>,
    depth: Option<u32>,
    priority: Option<i32>,
}

async fn seed(
    State(state): State<AppState>,
    Json(req): Json<SeedRequest>,
) -> Result<Json<Value>, ApiError> {
    let run_id = run_id_or_default(req.run_id);
    let handle = state.registry.get(&run_id)?;
    let mut coordinator = handle.lock().await;
    let outcome = coordinator.seed(&req.urls, req.depth, req.priority)?;
    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

#[derive(Debug, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigureRequest {
    run_id: Option<String>,
    config: Option<crate::config::ConfigUpdate>,
}

async fn configure(
    State(state): State<AppState>,
    Json(req): Json<ConfigureRequest>,
) -> Result<Json<Value>, ApiError> {
    let update = req
        .config
        .ok_or_else(|| ApiError::InvalidRequest("config is required".into()))?;
    let run_id = run_id_or_default(req.run_id);
    let handle = state.registry.get(&run_id)?;
    let mut coordinator = handle.lock().await;
    let config_id = coordinator.configure(update)?;
    Ok(Json(json!({ "configId": config_id })))
}

#[derive(Debug, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
struct LifecycleRequest {
    run_id: Option<String>,
}

async fn lifecycle<F>(
    state: &AppState,
    body: Option<Json<LifecycleRequest>>,
    transition: F,
) -> Result<Json<Value>, ApiError>
where
    F: FnOnce(&mut RunCoordinator) -> Result<RunStatus, ApiError>,
{
    let run_id = run_id_or_default(body.and_then(|Json(req)| req.run_id));
    let handle = state.registry.get(&run_id)?;
    let mut coordinator = handle.lock().await;
    let status = transition(&mut coordinator)?;
    Ok(Json(json!({ "status": status.as_str() })))
}

async fn start(
    State(state): State<AppState>,
    body: Option<Json<LifecycleRequest>>,
) -> Result<Json<Value>, ApiError> {
    lifecycle(&state, body, RunCoordinator::start).await
}

async fn pause(
    State(state): State<AppState>,
    body: Option<Json<LifecycleRequest>>,
) -> Result<Json<Value>, ApiError> {
    lifecycle(&state, body, RunCoordinator::pause).await
}

async fn resume(
    State(state): State<AppState>,
    body: Option<Json<LifecycleRequest>>,
) -> Result<Json<Value>, ApiError> {
    lifecycle(&state, body, RunCoordinator::resume).await
}

async fn cancel(
    State(state): State<AppState>,
    body: Option<Json<LifecycleRequest>>,
) -> Result<Json<Value>, ApiError> {
    lifecycle(&state, body, RunCoordinator::cancel).await
}

async fn reset(
    State(state): State<AppState>,
    body: Option<Json<LifecycleRequest>>,
) -> Result<Json<Value>, ApiError> {
    lifecycle(&state, body, RunCoordinator::reset).await
}

#[derive(Debug, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunQuery {
    run_id: Option<String>,
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> Result<Json<Value>, ApiError> {
    let run_id = run_id_or_default(query.run_id);
    let handle = state.registry.get(&run_id)?;
    let coordinator = handle.lock().await;
    Ok(Json(
        serde_json::to_value(coordinator.stats_view()).map_err(internal)?,
    ))
}

async fn status(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> Result<Json<Value>, ApiError> {
    let run_id = run_id_or_default(query.run_id);
    let handle = state.registry.get(&run_id)?;
    let coordinator = handle.lock().await;
    Ok(Json(
        serde_json::to_value(coordinator.status_view()).map_err(internal)?,
    ))
}

#[derive(Debug, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
struct RequestWorkRequest {
    run_id: Option<String>,
    batch_size: Option<u32>,
    worker_id: Option<String>,
}

async fn request_work(
    State(state): State<AppState>,
    Json(req): Json<RequestWorkRequest>,
) -> Result<Json<Value>, ApiError> {
    let run_id = run_id_or_default(req.run_id);
    let handle = state.registry.get(&run_id)?;
    let mut coordinator = handle.lock().await;
    let batch = coordinator.request_work(req.batch_size)?;
    if let Some(worker_id) = &req.worker_id {
        debug!(%run_id, %worker_id, urls = batch.urls.len(), "dispatched batch");
    }
    Ok(Json(serde_json::to_value(batch).map_err(internal)?))
}

#[derive(Debug, Default, SerdeDeserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReportResultRequest {
    run_id: Option<String>,
    url: Option<String>,
    status: Option<u16>,
    depth: Option<u32>,
    content_hash: Option<String>,
    content_size: Option<u64>,
    response_time_ms: Option<u64>,
    discovered_urls: Vec<String>,
    error: Option<String>,
    fetched_at: Option<u64>,
    /// Raw page body uploaded by workers that cannot reach the blob store
    /// themselves; stored before the report is applied.
    content: Option<String>,
}

async fn report_result(
    State(state): State<AppState>,
    Json(req): Json<ReportResultRequest>,
) -> Result<Json<Value>, ApiError> {
    let url = req
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("url is required".into()))?;
    let status = req
        .status
        .ok_or_else(|| ApiError::InvalidRequest("status is required".into()))?;

    let run_id = run_id_or_default(req.run_id);
    let handle = state.registry.get(&run_id)?;
    let mut coordinator = handle.lock().await;

    // Page bodies land in the blob store first; a failed write must keep
    // the report from being applied.
    let mut content_hash = req.content_hash;
    let succeeded = req.error.as_deref().map_or(true, |e| e.is_empty()) && status < 400;
    if let Some(content) = &req.content {
        if succeeded && coordinator.config().content_filtering.store_content {
            let hash = content_hash
                .clone()
                .unwrap_or_else(|| format!("{:x}", Sha256::digest(content.as_bytes())));
            let hostname = url_utils::extract_domain(&url)
                .ok_or_else(|| ApiError::InvalidRequest("URL has no host".into()))?;
            let key = blob_key(&run_id, &hostname, &hash);
            let metadata = HashMap::from([("url".to_string(), url.clone())]);
            state.blobs.put(&key, content.as_bytes(), "text/html", &metadata)?;
            content_hash = Some(hash);
        }
    }

    let record = coordinator.report_result(ResultReport {
        url,
        status,
        depth: req.depth,
        content_hash,
        content_size: req
            .content_size
            .or_else(|| req.content.as_ref().map(|c| c.len() as u64)),
        response_time_ms: req.response_time_ms,
        discovered_urls: req.discovered_urls,
        error: req.error,
        fetched_at: req.fetched_at,
    })?;
    drop(coordinator);

    // Metadata is best-effort: the coordinator snapshot is authoritative.
    if let Err(e) = state.pages.upsert(&record) {
        warn!(url = %record.url, error = %e, "page metadata upsert failed");
    }

    Ok(Json(json!({ "success": true })))
}

async fn on_cron(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let queue_size = state.registry.tick_all().await;
    Ok(Json(json!({ "queueSize": queue_size })))
}

fn internal(err: serde_json::Error) -> ApiError {
    ApiError::Internal(err.to_string())
}
