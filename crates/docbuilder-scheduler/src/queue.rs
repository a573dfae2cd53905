//! Bounded build queue with a worker pool, lifecycle events, and a bounded
//! history of finished jobs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docbuilder_config::QueueSettings;
use docbuilder_core::event::{BuildArtifacts, BuildEvent, EventSink};
use docbuilder_core::job::{BuildJob, JobId, JobStatus};

use crate::retry::{BuildRunner, RetryController};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,

    #[error("job id is required")]
    EmptyJobId,

    #[error("queue is closed")]
    Closed,
}

/// Active jobs plus the bounded ring of finished ones, guarded together.
#[derive(Debug, Default)]
struct JobTable {
    active: HashMap<JobId, BuildJob>,
    history: VecDeque<BuildJob>,
}

struct QueueState {
    table: std::sync::Mutex<JobTable>,
    history_cap: usize,
}

impl QueueState {
    fn table(&self) -> std::sync::MutexGuard<'_, JobTable> {
        // A panicked worker cannot leave the table in a half-written state;
        // recover the guard instead of propagating the poison.
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Bounded work queue: FIFO dispatch, priority as metadata only.
pub struct BuildQueue {
    tx: mpsc::Sender<BuildJob>,
    state: Arc<QueueState>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl BuildQueue {
    /// Create the queue and start its workers.
    pub fn new(
        settings: QueueSettings,
        runner: Arc<dyn BuildRunner>,
        retry: RetryController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<BuildJob>(settings.max_size.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let state = Arc::new(QueueState {
            table: std::sync::Mutex::new(JobTable::default()),
            history_cap: settings.history,
        });
        let shutdown = CancellationToken::new();

        let mut handles = Vec::with_capacity(settings.workers.max(1));
        for worker_id in 0..settings.workers.max(1) {
            let rx = rx.clone();
            let state = state.clone();
            let runner = runner.clone();
            let retry = retry.clone();
            let sink = sink.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, state, runner, retry, sink, shutdown).await;
            }));
        }

        Self {
            tx,
            state,
            workers: AsyncMutex::new(handles),
            shutdown,
        }
    }

    /// Non-blocking enqueue. A full channel rejects the job with no state
    /// change.
    pub fn enqueue(&self, mut job: BuildJob) -> Result<(), QueueError> {
        if job.id.is_empty() {
            return Err(QueueError::EmptyJobId);
        }
        job.status = JobStatus::Queued;
        self.tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Value copy of a job: the active set first, then history.
    pub fn job_snapshot(&self, id: &JobId) -> Option<BuildJob> {
        let table = self.state.table();
        table.active.get(id).cloned().or_else(|| {
            table
                .history
                .iter()
                .rev()
                .find(|job| &job.id == id)
                .cloned()
        })
    }

    pub fn active_count(&self) -> usize {
        self.state.table().active.len()
    }

    pub fn history_count(&self) -> usize {
        self.state.table().history.len()
    }

    /// Cancel every active job, release the workers, and wait for them.
    /// Enqueues are never blocked by shutdown; late jobs simply stay in the
    /// channel.
    pub async fn shutdown(&self) {
        info!("shutting down build queue");
        {
            let table = self.state.table();
            for job in table.active.values() {
                if let Some(cancel) = &job.cancel {
                    cancel.cancel();
                }
            }
        }
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        while let Some(handle) = workers.pop() {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<BuildJob>>>,
    state: Arc<QueueState>,
    runner: Arc<dyn BuildRunner>,
    retry: RetryController,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) {
    info!(worker = worker_id, "queue worker started");
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };
        process_job(worker_id, job, &state, runner.as_ref(), &retry, sink.as_ref(), &shutdown)
            .await;
    }
    info!(worker = worker_id, "queue worker stopped");
}

async fn emit(sink: &dyn EventSink, job_id: &JobId, event: BuildEvent) {
    if let Err(err) = sink.publish(job_id, event).await {
        // Emission is fire-and-forget; a broken sink never fails the job.
        warn!(job = %job_id, error = %err, "lifecycle event emission failed");
    }
}

async fn process_job(
    worker_id: usize,
    mut job: BuildJob,
    state: &QueueState,
    runner: &dyn BuildRunner,
    retry: &RetryController,
    sink: &dyn EventSink,
    shutdown: &CancellationToken,
) {
    let cancel = shutdown.child_token();
    job.cancel = Some(cancel.clone());
    job.status = JobStatus::Running;
    job.started_at = Some(Utc::now());
    state.table().active.insert(job.id.clone(), job.clone());

    info!(
        worker = worker_id,
        job = %job.id,
        job_type = %job.job_type,
        priority = %job.priority,
        "processing build job"
    );
    emit(
        sink,
        &job.id,
        BuildEvent::BuildStarted {
            job_type: job.job_type,
            priority: job.priority,
            worker_id,
        },
    )
    .await;

    let attempt = retry.execute(&cancel, runner, &job).await;

    let finished_at = Utc::now();
    job.completed_at = Some(finished_at);
    job.duration = job
        .started_at
        .map(|started| (finished_at - started).to_std().unwrap_or_default());
    match &attempt.result {
        Ok(()) => job.status = JobStatus::Completed,
        Err(err) => {
            job.status = JobStatus::Failed;
            job.error = Some(err.to_string());
        }
    }

    {
        let mut table = state.table();
        table.active.remove(&job.id);
        table.history.push_back(job.clone());
        while table.history.len() > state.history_cap {
            table.history.pop_front();
        }
    }

    let duration = job.duration.unwrap_or_default();
    let report = attempt.report.map(Arc::new);
    if let Some(report) = &report {
        emit(
            sink,
            &job.id,
            BuildEvent::BuildReport {
                report: report.clone(),
            },
        )
        .await;
    }
    match &attempt.result {
        Ok(()) => {
            let artifacts = report
                .as_ref()
                .map(|r| BuildArtifacts {
                    files: r.files,
                    repositories: r.repositories,
                })
                .unwrap_or_default();
            emit(
                sink,
                &job.id,
                BuildEvent::BuildCompleted {
                    duration,
                    artifacts,
                },
            )
            .await;
        }
        Err(err) => {
            let stage = report
                .as_ref()
                .and_then(|r| r.causes.last().map(|c| c.stage));
            emit(
                sink,
                &job.id,
                BuildEvent::BuildFailed {
                    stage,
                    error_msg: err.to_string(),
                },
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use docbuilder_core::Error;
    use docbuilder_core::job::{JobPriority, JobType};
    use docbuilder_core::report::BuildReport;

    use crate::retry::{BuildAttempt, RetryPolicy};

    fn settings(max_size: usize, workers: usize, history: usize) -> QueueSettings {
        QueueSettings {
            max_size,
            workers,
            history,
        }
    }

    /// Records every event it sees.
    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<Vec<(JobId, String)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, name)| name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, job_id: &JobId, event: BuildEvent) -> anyhow::Result<()> {
            let name = match &event {
                BuildEvent::BuildStarted { .. } => "started",
                BuildEvent::BuildReport { .. } => "report",
                BuildEvent::BuildCompleted { .. } => "completed",
                BuildEvent::BuildFailed { .. } => "failed",
            };
            self.events
                .lock()
                .unwrap()
                .push((job_id.clone(), name.to_string()));
            if self.fail {
                anyhow::bail!("sink unavailable");
            }
            Ok(())
        }
    }

    enum RunnerMode {
        Succeed,
        Fail,
        WaitForCancel,
        Block(Arc<tokio::sync::Notify>),
    }

    struct TestRunner {
        mode: RunnerMode,
    }

    #[async_trait]
    impl BuildRunner for TestRunner {
        async fn run_build(&self, cancel: &CancellationToken, _job: &BuildJob) -> BuildAttempt {
            match &self.mode {
                RunnerMode::Succeed => {
                    let mut report = BuildReport::new();
                    report.repositories = 2;
                    report.files = 9;
                    report.finish();
                    BuildAttempt {
                        report: Some(report),
                        result: Ok(()),
                    }
                }
                RunnerMode::Fail => BuildAttempt {
                    report: Some(BuildReport::new()),
                    result: Err(Error::Hugo("exit status 1".into())),
                },
                RunnerMode::WaitForCancel => {
                    cancel.cancelled().await;
                    BuildAttempt {
                        report: None,
                        result: Err(Error::Canceled),
                    }
                }
                RunnerMode::Block(notify) => {
                    notify.notified().await;
                    BuildAttempt {
                        report: None,
                        result: Ok(()),
                    }
                }
            }
        }
    }

    fn queue_with(
        mode: RunnerMode,
        settings_: QueueSettings,
        sink: Arc<RecordingSink>,
    ) -> BuildQueue {
        BuildQueue::new(
            settings_,
            Arc::new(TestRunner { mode }),
            RetryController::new(RetryPolicy::default()),
            sink,
        )
    }

    async fn wait_terminal(queue: &BuildQueue, id: &JobId) -> BuildJob {
        for _ in 0..500 {
            if let Some(job) = queue.job_snapshot(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn test_empty_job_id_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(RunnerMode::Succeed, settings(4, 1, 10), sink);
        let job = BuildJob::new(JobType::Manual, JobPriority::Normal).with_id("");
        assert_eq!(queue.enqueue(job), Err(QueueError::EmptyJobId));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_successful_job_lifecycle_and_events() {
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(RunnerMode::Succeed, settings(4, 1, 10), sink.clone());
        let job = BuildJob::new(JobType::Webhook, JobPriority::High);
        let id = job.id.clone();
        queue.enqueue(job).unwrap();

        let done = wait_terminal(&queue, &id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.duration.is_some());
        assert!(done.error.is_none());
        assert_eq!(queue.active_count(), 0);
        assert_eq!(queue.history_count(), 1);

        assert_eq!(sink.names(), vec!["started", "report", "completed"]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_records_error_and_emits_failed() {
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(RunnerMode::Fail, settings(4, 1, 10), sink.clone());
        let job = BuildJob::new(JobType::Manual, JobPriority::Normal);
        let id = job.id.clone();
        queue.enqueue(job).unwrap();

        let done = wait_terminal(&queue, &id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.as_deref().unwrap().contains("exit status 1"));
        assert_eq!(sink.names(), vec!["started", "report", "failed"]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_sink_failures_never_fail_the_job() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let queue = queue_with(RunnerMode::Succeed, settings(4, 1, 10), sink.clone());
        let job = BuildJob::new(JobType::Manual, JobPriority::Normal);
        let id = job.id.clone();
        queue.enqueue(job).unwrap();

        let done = wait_terminal(&queue, &id).await;
        assert_eq!(done.status, JobStatus::Completed);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_rejects_without_state_change() {
        let sink = Arc::new(RecordingSink::default());
        let gate = Arc::new(tokio::sync::Notify::new());
        let queue = queue_with(
            RunnerMode::Block(gate.clone()),
            settings(1, 1, 10),
            sink,
        );

        // First job occupies the single worker.
        let first = BuildJob::new(JobType::Manual, JobPriority::Normal);
        let first_id = first.id.clone();
        queue.enqueue(first).unwrap();
        for _ in 0..500 {
            if queue.active_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(queue.active_count(), 1);

        // Second job fills the channel; the third must bounce.
        queue
            .enqueue(BuildJob::new(JobType::Manual, JobPriority::Normal))
            .unwrap();
        let overflow = BuildJob::new(JobType::Manual, JobPriority::Normal);
        let overflow_id = overflow.id.clone();
        assert_eq!(queue.enqueue(overflow), Err(QueueError::Full));
        assert!(queue.job_snapshot(&overflow_id).is_none());

        gate.notify_waiters();
        gate.notify_one();
        let _ = wait_terminal(&queue, &first_id).await;
        gate.notify_one();
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_jobs() {
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(RunnerMode::WaitForCancel, settings(4, 1, 10), sink);
        let job = BuildJob::new(JobType::Manual, JobPriority::Normal);
        let id = job.id.clone();
        queue.enqueue(job).unwrap();
        for _ in 0..500 {
            if queue.active_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        queue.shutdown().await;
        let done = queue.job_snapshot(&id).expect("job in history");
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.as_deref().unwrap().contains("canceled"));
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(RunnerMode::Succeed, settings(16, 1, 2), sink);
        let mut last = None;
        for _ in 0..5 {
            let job = BuildJob::new(JobType::Manual, JobPriority::Normal);
            last = Some(job.id.clone());
            queue.enqueue(job).unwrap();
            wait_terminal(&queue, last.as_ref().unwrap()).await;
        }
        assert_eq!(queue.history_count(), 2);
        // The most recent job is still visible.
        assert!(queue.job_snapshot(last.as_ref().unwrap()).is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_is_a_value_copy() {
        let sink = Arc::new(RecordingSink::default());
        let queue = queue_with(RunnerMode::Succeed, settings(4, 1, 10), sink);
        let job = BuildJob::new(JobType::Manual, JobPriority::Normal);
        let id = job.id.clone();
        queue.enqueue(job).unwrap();
        wait_terminal(&queue, &id).await;

        let mut snapshot = queue.job_snapshot(&id).unwrap();
        snapshot.error = Some("mutated locally".into());
        let fresh = queue.job_snapshot(&id).unwrap();
        assert!(fresh.error.is_none());
        queue.shutdown().await;
    }
}
