//! Lifecycle events emitted around queued builds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobPriority, JobType};
use crate::report::BuildReport;
use crate::stage::Stage;

/// Counts of what a completed build produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifacts {
    pub files: usize,
    pub repositories: usize,
}

/// Fire-and-forget lifecycle events. Emission failures are logged by the
/// queue and never alter a job's outcome.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    BuildStarted {
        job_type: JobType,
        priority: JobPriority,
        worker_id: usize,
    },
    BuildCompleted {
        duration: Duration,
        artifacts: BuildArtifacts,
    },
    BuildFailed {
        stage: Option<Stage>,
        error_msg: String,
    },
    BuildReport {
        report: Arc<BuildReport>,
    },
}

/// Capability for delivering lifecycle events to an external consumer.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, job_id: &JobId, event: BuildEvent) -> anyhow::Result<()>;
}

/// Default sink: drops every event.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn publish(&self, _job_id: &JobId, _event: BuildEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
