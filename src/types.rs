//! Core types for novel-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a download task
///
/// Generated once at submission time and opaque to callers. Stored as its
/// hyphenated string form in SQLite and in queue messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random task id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl<'s> utoipa::ToSchema<'s> for TaskId {
    fn schema() -> (
        &'s str,
        utoipa::openapi::RefOr<utoipa::openapi::schema::Schema>,
    ) {
        (
            "TaskId",
            utoipa::openapi::ObjectBuilder::new()
                .schema_type(utoipa::openapi::SchemaType::String)
                .format(Some(utoipa::openapi::SchemaFormat::KnownFormat(
                    utoipa::openapi::KnownFormat::Uuid,
                )))
                .into(),
        )
    }
}

// Implement sqlx Type, Encode, and Decode so task ids bind as TEXT columns
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(raw.parse::<Uuid>()?))
    }
}

/// Lifecycle state of a download task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created and queued, not yet claimed by a worker
    Pending,
    /// Claimed by a worker and executing
    Running,
    /// Completed with an artifact
    Succeeded,
    /// Failed; transient failures return to Running on redelivery
    Failed,
    /// Retry budget exhausted, quarantined for operator inspection
    DeadLettered,
}

impl TaskState {
    /// String form used in the database and queue messages
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::DeadLettered => "dead_lettered",
        }
    }

    /// Decode a stored state string
    ///
    /// Unknown values decode to `Failed` so corrupted rows surface visibly
    /// rather than silently re-entering the queue.
    pub fn from_db(s: &str) -> Self {
        match s {
            "pending" => TaskState::Pending,
            "running" => TaskState::Running,
            "succeeded" => TaskState::Succeeded,
            "failed" => TaskState::Failed,
            "dead_lettered" => TaskState::DeadLettered,
            _ => TaskState::Failed,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a persisted task failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Recoverable; the queue redelivers until the attempt budget runs out
    Transient,
    /// Terminal; never retried
    Permanent,
    /// Task record was created but the queue message could not be sent
    Enqueue,
    /// Attempt budget exhausted, message routed to the dead-letter channel
    DeadLetter,
}

impl FailureKind {
    /// String form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Enqueue => "enqueue",
            FailureKind::DeadLetter => "dead_letter",
        }
    }

    /// Decode a stored failure kind; unknown values decode to `Permanent`
    /// so a corrupted row is never silently retried.
    pub fn from_db(s: &str) -> Self {
        match s {
            "transient" => FailureKind::Transient,
            "permanent" => FailureKind::Permanent,
            "enqueue" => FailureKind::Enqueue,
            "dead_letter" => FailureKind::DeadLetter,
            _ => FailureKind::Permanent,
        }
    }
}

/// Caller-supplied download parameters
///
/// Mirrors the submission schema: optional chapter bounds and a
/// force-refresh flag. All fields default when omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadOptions {
    /// First chapter to include (1-based; None = from the beginning)
    #[serde(default)]
    pub start_chapter: Option<u32>,

    /// Last chapter to include (None = through the latest)
    #[serde(default)]
    pub end_chapter: Option<u32>,

    /// Re-download even when a previous artifact for the work exists
    #[serde(default)]
    pub force_update: bool,
}

/// Persisted failure detail surfaced through the status read path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskError {
    /// Human-readable failure message
    pub message: String,
    /// Failure classification
    pub kind: FailureKind,
}

/// Snapshot of a task returned by the status service
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskStatus {
    /// Task identifier
    pub task_id: TaskId,

    /// Logical content unit this task downloads
    pub work_id: String,

    /// Current lifecycle state
    pub state: TaskState,

    /// Delivery attempts consumed so far
    pub attempt_count: u32,

    /// Artifact location, set only once the task succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,

    /// Last recorded failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When the task record last changed
    pub updated_at: DateTime<Utc>,
}

/// Compact per-task entry in a caller's work listing
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkSummary {
    /// Task identifier
    pub task_id: TaskId,

    /// Logical content unit
    pub work_id: String,

    /// Current lifecycle state
    pub state: TaskState,

    /// Artifact location for succeeded tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,
}

/// Work queue statistics
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Messages currently receivable
    pub visible: usize,

    /// Messages delivered and hidden behind a visibility window
    pub in_flight: usize,

    /// Messages quarantined on the dead-letter channel
    pub dead_lettered: usize,
}

/// Event emitted during the task lifecycle
///
/// Events are an in-process broadcast for embedders; the caller-facing
/// contract stays poll-only through the status service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task validated, recorded, and enqueued
    TaskQueued {
        /// Task identifier
        task_id: TaskId,
        /// Logical content unit
        work_id: String,
    },

    /// A worker claimed the task and began executing
    TaskStarted {
        /// Task identifier
        task_id: TaskId,
        /// Attempt number for this execution (1-based)
        attempt: u32,
    },

    /// Task completed and the artifact was stored
    TaskSucceeded {
        /// Task identifier
        task_id: TaskId,
        /// Artifact location
        artifact_ref: String,
    },

    /// Task attempt failed
    TaskFailed {
        /// Task identifier
        task_id: TaskId,
        /// Failure message
        error: String,
        /// Whether the queue will redeliver the task
        will_retry: bool,
    },

    /// Task exhausted its retry budget and was quarantined
    TaskDeadLettered {
        /// Task identifier
        task_id: TaskId,
    },

    /// The reaper deleted an expired artifact
    ArtifactReaped {
        /// Task identifier the artifact belonged to
        task_id: TaskId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
