//! Build jobs processed by the queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::repository::Forge;

/// Identifier of a queued build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// A fresh time-ordered identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What caused a build to be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Manual,
    Scheduled,
    Webhook,
    Discovery,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Manual => f.write_str("manual"),
            JobType::Scheduled => f.write_str("scheduled"),
            JobType::Webhook => f.write_str("webhook"),
            JobType::Discovery => f.write_str("discovery"),
        }
    }
}

/// Priority is metadata: the queue dispatches FIFO and never preempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Low => f.write_str("low"),
            JobPriority::Normal => f.write_str("normal"),
            JobPriority::High => f.write_str("high"),
            JobPriority::Urgent => f.write_str("urgent"),
        }
    }
}

/// Job lifecycle. Transitions form a DAG:
/// queued -> running -> (completed | failed | canceled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Canceled) => true,
            (JobStatus::Running, s) if s.is_terminal() => true,
            _ => false,
        }
    }
}

/// Typed job metadata. Consumers dispatch on the variant, never on a
/// runtime type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobMeta {
    #[default]
    None,
    Webhook {
        forge: Forge,
        repository: String,
        reference: String,
    },
    Schedule {
        expression: String,
    },
    Discovery {
        repositories: Vec<String>,
    },
}

/// One unit of work for the build queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: JobId,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    #[serde(default)]
    pub meta: JobMeta,
    /// Set by the worker that picks the job up; invoked on queue shutdown.
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl BuildJob {
    pub fn new(job_type: JobType, priority: JobPriority) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            priority,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            error: None,
            meta: JobMeta::None,
            cancel: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_meta(mut self, meta: JobMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Backoff curves applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}
