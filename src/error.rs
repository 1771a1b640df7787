//! Error types for novel-dl
//!
//! This module provides error handling for the pipeline, including:
//! - Domain-specific error types (submission, queue, content source, blob store)
//! - The transient/permanent classification the worker retry path relies on
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::TaskId;

/// Result type alias for novel-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for novel-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed submission; rejected synchronously, no task created
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of the violation
        message: String,
        /// The offending field, when attributable
        field: Option<&'static str>,
    },

    /// Task record exists but the queue message could not be sent
    #[error("failed to enqueue task {task_id}: {reason}")]
    Enqueue {
        /// The task whose message was lost
        task_id: TaskId,
        /// Why the enqueue failed
        reason: String,
    },

    /// Content source failure (classified transient/permanent by the worker)
    #[error("content source error: {0}")]
    Source(#[from] SourceError),

    /// Blob store failure
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Task not found (or outside the caller's access scope)
    #[error("task not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new submissions
    #[error("shutdown in progress: not accepting new submissions")]
    ShuttingDown,

    /// API server error
    #[error("API server error: {0}")]
    ApiServer(String),
}

impl Error {
    /// Construct a validation error with an attributed field
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field),
        }
    }
}

/// Content source failures, as classified by the worker (§ failure semantics)
///
/// Transient variants are retried by queue redelivery; permanent variants are
/// terminal and never retried.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure from the HTTP client
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Source asked us to back off
    #[error("rate limited by content source")]
    RateLimited {
        /// Retry-After hint in seconds, when the source provided one
        retry_after_secs: Option<u64>,
    },

    /// Source-side server error (5xx)
    #[error("content source returned status {status}")]
    Upstream {
        /// HTTP status code returned
        status: u16,
    },

    /// The requested work does not exist at the source
    #[error("work {work_id} not found at content source")]
    WorkNotFound {
        /// The missing work
        work_id: String,
    },

    /// The work existed but has been removed
    #[error("work {work_id} is no longer available")]
    Gone {
        /// The removed work
        work_id: String,
    },

    /// The source returned content we could not interpret
    #[error("malformed content for work {work_id}: {reason}")]
    Malformed {
        /// The affected work
        work_id: String,
        /// What was wrong with the payload
        reason: String,
    },

    /// Requested chapter range does not exist for the work
    #[error("work {work_id} has {available} chapters, requested {requested}")]
    ChapterOutOfRange {
        /// The affected work
        work_id: String,
        /// Chapters the source reports
        available: u32,
        /// First missing chapter that was requested
        requested: u32,
    },
}

impl SourceError {
    /// Whether the queue should redeliver after this failure
    ///
    /// Network timeouts, connection failures, rate limiting, and upstream 5xx
    /// are transient. Missing/removed works, malformed payloads, and
    /// out-of-range requests are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SourceError::RateLimited { .. } => true,
            SourceError::Upstream { .. } => true,
            SourceError::WorkNotFound { .. } => false,
            SourceError::Gone { .. } => false,
            SourceError::Malformed { .. } => false,
            SourceError::ChapterOutOfRange { .. } => false,
        }
    }
}

/// Blob store errors
#[derive(Debug, Error)]
pub enum BlobError {
    /// Write-once violation: the key already holds an artifact
    #[error("artifact already exists: {key}")]
    AlreadyExists {
        /// The conflicting key
        key: String,
    },

    /// No artifact under the key (possibly reaped)
    #[error("artifact not found: {key}")]
    NotFound {
        /// The missing key
        key: String,
    },

    /// Key failed validation (empty, absolute, or path-traversing)
    #[error("invalid artifact key: {key}")]
    InvalidKey {
        /// The rejected key
        key: String,
    },

    /// Underlying filesystem failure
    #[error("blob I/O failed for {key}: {source}")]
    Io {
        /// The affected key
        key: String,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// API error response format
///
/// Returned by API endpoints when an error occurs: a machine-readable code,
/// a human-readable message, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "task 4f7c... not found",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - invalid input
            Error::Validation { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 500 Internal Server Error - server-side issues
            Error::Enqueue { .. } => 500,
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Blob(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServer(_) => 500,

            // 502 Bad Gateway - external service errors
            Error::Source(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation { .. } => "validation_error",
            Error::Enqueue { .. } => "enqueue_failure",
            Error::Source(_) => "source_error",
            Error::Blob(_) => "blob_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::NotFound(_) => "not_found",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::ApiServer(_) => "api_server_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            Error::Enqueue { task_id, .. } => Some(serde_json::json!({
                "task_id": task_id.to_string(),
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
