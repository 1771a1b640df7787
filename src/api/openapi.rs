//! OpenAPI document assembly.

use utoipa::OpenApi;

use super::routes;

/// OpenAPI documentation for the novel-dl REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "novel-dl API",
        description = "Submit web-novel download tasks and poll their status",
    ),
    paths(
        routes::submit_download,
        routes::get_status,
        routes::list_works,
        routes::get_artifact,
        routes::health_check,
        routes::openapi_spec,
    ),
    components(schemas(
        routes::DownloadRequest,
        routes::DownloadResponse,
        routes::WorksResponse,
        crate::error::ApiError,
        crate::error::ErrorDetail,
        crate::types::DownloadOptions,
        crate::types::FailureKind,
        crate::types::TaskError,
        crate::types::TaskId,
        crate::types::TaskState,
        crate::types::TaskStatus,
        crate::types::WorkSummary,
    )),
    tags(
        (name = "download", description = "Task submission and status"),
        (name = "system", description = "Service health and documentation")
    )
)]
pub struct ApiDoc;
