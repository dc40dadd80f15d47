//! HTTP control API: a thin RESTful projection of the IPC operations
//! under `/api/v1`, with bearer-token auth, a uniform JSON envelope,
//! and an audit event for every mutating operation.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use lsh_core::{Error, JobId, JobSpec};

use crate::audit::{AuditEvent, AuditLogger};
use crate::daemon::JobDaemon;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub daemon: Arc<JobDaemon>,
    pub audit: Arc<AuditLogger>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

/// Uniform response envelope: `{success, data?, error?}`.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ApiErrorBody>,
}

fn ok_response<T: Serialize>(data: T) -> Response {
    let body = Envelope {
        success: true,
        data: serde_json::to_value(data).ok(),
        error: None,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn error_response(error: &Error) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Envelope {
        success: false,
        data: None,
        error: Some(ApiErrorBody {
            code: error.code().to_string(),
            message: error.to_string(),
        }),
    };
    (status, Json(body)).into_response()
}

fn respond<T: Serialize>(result: lsh_core::Result<T>) -> Response {
    match result {
        Ok(data) => ok_response(data),
        Err(error) => error_response(&error),
    }
}

/// Build the router. Every route sits behind the bearer-token check.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/jobs", get(list_jobs).post(create_job))
        .route("/api/v1/jobs/:id", get(get_job).delete(remove_job))
        .route("/api/v1/jobs/:id/start", post(start_job))
        .route("/api/v1/jobs/:id/stop", post(stop_job))
        .route("/api/v1/jobs/:id/trigger", post(trigger_job))
        .route("/api/v1/jobs/:id/pause", post(pause_job))
        .route("/api/v1/jobs/:id/resume", post(resume_job))
        .route("/api/v1/jobs/:id/history", get(job_history))
        .route("/api/v1/jobs/:id/statistics", get(job_statistics))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

/// Bearer-token gate. The token is validated against the configured
/// API key; absence of a configured key locks the API entirely.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = match (&state.api_key, presented) {
        (Some(expected), Some(token)) => token == expected,
        _ => false,
    };
    if !authorized {
        return error_response(&Error::Unauthorized);
    }
    next.run(request).await
}

async fn audit(state: &AppState, action: &str, target: &str, success: bool) {
    state
        .audit
        .record(AuditEvent::new("api", action, target, success))
        .await;
}

async fn get_status(State(state): State<AppState>) -> Response {
    ok_response(state.daemon.status())
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<lsh_core::JobStatus>,
    tag: Option<String>,
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let filter = crate::protocol::JobFilter {
        status: query.status,
        tag: query.tag,
        name_contains: None,
    };
    ok_response(state.daemon.list_jobs(Some(&filter)))
}

async fn create_job(State(state): State<AppState>, Json(spec): Json<JobSpec>) -> Response {
    let target = spec.id.to_string();
    let result = state.daemon.create_job(spec).await;
    audit(&state, "createJob", &target, result.is_ok()).await;
    respond(result)
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(state.daemon.get_job(&JobId(id)))
}

#[derive(Debug, Default, Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    force: bool,
}

async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Response {
    let result = state.daemon.remove_job(&JobId(id.clone()), query.force).await;
    audit(&state, "removeJob", &id, result.is_ok()).await;
    respond(result)
}

async fn start_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state.daemon.start_job(&JobId(id.clone())).await;
    audit(&state, "startJob", &id, result.is_ok()).await;
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
struct StopBody {
    signal: Option<String>,
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StopBody>>,
) -> Response {
    let signal = body.and_then(|Json(b)| b.signal);
    let result = state.daemon.stop_job(&JobId(id.clone()), signal).await;
    audit(&state, "stopJob", &id, result.is_ok()).await;
    respond(result)
}

async fn trigger_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state.daemon.trigger_job(&JobId(id.clone())).await;
    audit(&state, "triggerJob", &id, result.is_ok()).await;
    respond(result)
}

async fn pause_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state.daemon.pause_job(&JobId(id.clone())).await;
    audit(&state, "pauseJob", &id, result.is_ok()).await;
    respond(result)
}

async fn resume_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state.daemon.resume_job(&JobId(id.clone())).await;
    audit(&state, "resumeJob", &id, result.is_ok()).await;
    respond(result)
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn job_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let id = JobId(id);
    // 404 for unknown jobs rather than an empty list.
    if let Err(e) = state.daemon.get_job(&id) {
        return error_response(&e);
    }
    ok_response(
        state
            .daemon
            .get_history(Some(&id), query.limit.unwrap_or(20)),
    )
}

async fn job_statistics(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.daemon.get_statistics(Some(&JobId(id))) {
        Ok(stats) => ok_response(json!(stats[0])),
        Err(error) => error_response(&error),
    }
}
