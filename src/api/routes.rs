//! API route handlers: submission, status, works listing, artifacts, health.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::error::{ApiError, Error, ToHttpStatus};
use crate::types::{DownloadOptions, TaskId, TaskStatus, WorkSummary};

use super::AppState;

/// Header carrying the caller identity, installed by the upstream authorizer.
/// Authentication itself is outside this service.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Map a domain error onto an HTTP response with a structured body
fn error_response(err: Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ApiError = err.into();
    (status, Json(body)).into_response()
}

fn owner_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiError::unauthorized(format!(
                    "missing {OWNER_HEADER} header"
                ))),
            )
                .into_response()
        })
}

fn parse_task_id(raw: &str) -> Result<TaskId, Response> {
    raw.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::validation(format!(
                "task id {raw:?} is not a valid identifier"
            ))),
        )
            .into_response()
    })
}

/// Body of POST /api/download
#[derive(Debug, Deserialize, ToSchema)]
pub struct DownloadRequest {
    /// Logical content unit to download (1-50 chars)
    pub work_id: String,
    /// Optional chapter bounds and refresh flag
    #[serde(default)]
    pub options: DownloadOptions,
}

/// Response of POST /api/download
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadResponse {
    /// Human-readable acknowledgement
    pub message: String,
    /// Identifier to poll via GET /api/status/{task_id}
    pub task_id: TaskId,
    /// Echo of the submitted work id
    pub work_id: String,
}

/// Query parameters of GET /api/works
#[derive(Debug, Deserialize)]
pub struct WorksQuery {
    /// Maximum entries returned (default 50)
    #[serde(default = "default_works_limit")]
    pub limit: u32,
}

fn default_works_limit() -> u32 {
    50
}

/// Response of GET /api/works
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorksResponse {
    /// The caller's recent tasks, newest first
    pub works: Vec<WorkSummary>,
}

/// POST /api/download - Submit a download request
#[utoipa::path(
    post,
    path = "/api/download",
    tag = "download",
    request_body = DownloadRequest,
    responses(
        (status = 202, description = "Task accepted for asynchronous processing", body = DownloadResponse),
        (status = 400, description = "Malformed submission", body = ApiError),
        (status = 401, description = "Missing caller identity", body = ApiError),
        (status = 503, description = "Shutting down", body = ApiError)
    )
)]
pub async fn submit_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DownloadRequest>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match state
        .downloader
        .submit(&owner, &request.work_id, request.options)
        .await
    {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(DownloadResponse {
                message: "download accepted".into(),
                task_id,
                work_id: request.work_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/status/{task_id} - Poll a task's lifecycle state
#[utoipa::path(
    get,
    path = "/api/status/{task_id}",
    tag = "download",
    params(("task_id" = String, Path, description = "Task identifier")),
    responses(
        (status = 200, description = "Current task status", body = TaskStatus),
        (status = 400, description = "Malformed task id", body = ApiError),
        (status = 401, description = "Missing caller identity", body = ApiError),
        (status = 404, description = "Unknown task", body = ApiError)
    )
)]
pub async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    let task_id = match parse_task_id(&task_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.downloader.get_status(&owner, task_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/works - List the caller's recent tasks
#[utoipa::path(
    get,
    path = "/api/works",
    tag = "download",
    responses(
        (status = 200, description = "Recent tasks, newest first", body = WorksResponse),
        (status = 401, description = "Missing caller identity", body = ApiError)
    )
)]
pub async fn list_works(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WorksQuery>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match state.downloader.list_works(&owner, query.limit).await {
        Ok(works) => (StatusCode::OK, Json(WorksResponse { works })).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/artifact/{task_id} - Fetch a succeeded task's artifact
#[utoipa::path(
    get,
    path = "/api/artifact/{task_id}",
    tag = "download",
    params(("task_id" = String, Path, description = "Task identifier")),
    responses(
        (status = 200, description = "Artifact text", content_type = "text/plain"),
        (status = 400, description = "Malformed task id", body = ApiError),
        (status = 401, description = "Missing caller identity", body = ApiError),
        (status = 404, description = "Unknown task or artifact expired", body = ApiError)
    )
)]
pub async fn get_artifact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    let task_id = match parse_task_id(&task_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.downloader.get_artifact(&owner, task_id).await {
        Ok(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            data,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/health - Health check (no caller identity required)
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy"))
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /api/openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/openapi.json",
    tag = "system",
    responses((status = 200, description = "OpenAPI specification in JSON format"))
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use utoipa::OpenApi;

    Json(super::ApiDoc::openapi())
}
