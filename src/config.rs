//! Configuration types for novel-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Work queue behavior (visibility, retry budget, dead-lettering)
///
/// The retry state machine is driven entirely by these parameters, so it can
/// be exercised in tests without any external queue infrastructure.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueConfig {
    /// How long a received message stays hidden from other receivers
    /// (default: 15 minutes). Must exceed the worst-case processing time of
    /// one task, or a slow worker races its own redelivery.
    #[serde(default = "default_visibility_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub visibility_timeout: Duration,

    /// Deliveries allowed before a message is routed to the dead-letter
    /// channel (default: 3)
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Maximum messages handed to a worker per receive (default: 1)
    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,

    /// How long dead-lettered messages are retained for operator inspection
    /// (default: 14 days)
    #[serde(default = "default_dead_letter_retention", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub dead_letter_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            receive_batch_size: default_receive_batch_size(),
            dead_letter_retention: default_dead_letter_retention(),
        }
    }
}

/// Worker pool behavior
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkerConfig {
    /// Number of independent worker tasks to run (default: 2)
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,

    /// Long-poll window for an empty-queue receive (default: 5 seconds)
    #[serde(default = "default_poll_wait", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub poll_wait: Duration,

    /// Add random jitter to poll waits so idle workers don't wake in
    /// lockstep (default: true)
    #[serde(default = "default_true")]
    pub poll_jitter: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            poll_wait: default_poll_wait(),
            poll_jitter: true,
        }
    }
}

/// Data storage: task database, artifact directory, and expiry policy
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageConfig {
    /// SQLite database path (default: "./data/novel-dl.db")
    #[serde(default = "default_database_path")]
    #[schema(value_type = String)]
    pub database_path: PathBuf,

    /// Root directory for stored artifacts (default: "./artifacts")
    #[serde(default = "default_artifact_dir")]
    #[schema(value_type = String)]
    pub artifact_dir: PathBuf,

    /// How long current artifacts are retained (default: 90 days)
    #[serde(default = "default_artifact_retention", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub artifact_retention: Duration,

    /// How long superseded artifacts are retained once a newer successful
    /// download of the same work exists (default: 30 days)
    #[serde(default = "default_superseded_retention", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub superseded_retention: Duration,

    /// Interval between reaper sweeps (default: 1 hour)
    #[serde(default = "default_reaper_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub reaper_interval: Duration,

    /// Whether the background artifact reaper runs (default: true)
    #[serde(default = "default_true")]
    pub reaper_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            artifact_dir: default_artifact_dir(),
            artifact_retention: default_artifact_retention(),
            superseded_retention: default_superseded_retention(),
            reaper_interval: default_reaper_interval(),
            reaper_enabled: true,
        }
    }
}

/// Content source endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SourceConfig {
    /// Base URL of the content source API
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub request_timeout: Duration,

    /// User-Agent header sent to the source
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// REST API server configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Bind address (default: 127.0.0.1:8791)
    #[serde(default = "default_bind_addr")]
    #[schema(value_type = String)]
    pub bind_addr: SocketAddr,

    /// Whether to attach a permissive CORS layer (default: true)
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: true,
        }
    }
}

/// Main configuration for the download pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`queue`](QueueConfig) — visibility window, retry budget, dead-lettering
/// - [`worker`](WorkerConfig) — worker pool size and polling
/// - [`storage`](StorageConfig) — database, artifacts, expiry policy
/// - [`source`](SourceConfig) — content source endpoint
/// - [`api`](ApiConfig) — REST API server
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Work queue behavior
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool behavior
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Data storage and expiry policy
    #[serde(default)]
    pub storage: StorageConfig,

    /// Content source endpoint
    #[serde(default)]
    pub source: SourceConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.visibility_timeout.is_zero() {
            return Err(Error::Validation {
                message: "queue.visibility_timeout must be greater than zero".into(),
                field: Some("queue.visibility_timeout"),
            });
        }
        if self.queue.max_receive_count == 0 {
            return Err(Error::Validation {
                message: "queue.max_receive_count must be at least 1".into(),
                field: Some("queue.max_receive_count"),
            });
        }
        if self.queue.receive_batch_size == 0 {
            return Err(Error::Validation {
                message: "queue.receive_batch_size must be at least 1".into(),
                field: Some("queue.receive_batch_size"),
            });
        }
        if self.worker.concurrency == 0 {
            return Err(Error::Validation {
                message: "worker.concurrency must be at least 1".into(),
                field: Some("worker.concurrency"),
            });
        }
        if self.source.base_url.is_empty() {
            return Err(Error::Validation {
                message: "source.base_url must not be empty".into(),
                field: Some("source.base_url"),
            });
        }
        Ok(())
    }
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_receive_batch_size() -> usize {
    1
}

fn default_dead_letter_retention() -> Duration {
    Duration::from_secs(14 * 24 * 60 * 60)
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_poll_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/novel-dl.db")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_artifact_retention() -> Duration {
    Duration::from_secs(90 * 24 * 60 * 60)
}

fn default_superseded_retention() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_reaper_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_source_base_url() -> String {
    "https://api.example.com/novels".to_string()
}

fn default_user_agent() -> String {
    format!("novel-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8791))
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
