//! CLI command implementations and service wiring.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docbuilder_config::BuildConfig;
use docbuilder_core::Error;
use docbuilder_core::event::{BuildEvent, EventSink};
use docbuilder_core::job::{BuildJob, JobId, JobPriority, JobType};
use docbuilder_git::GitFetcher;
use docbuilder_pipeline::service::{BuildOptions, SkipEvaluatorFactory};
use docbuilder_pipeline::skip::JsonStateStore;
use docbuilder_pipeline::{
    BuildRequest, BuildService, BuildStatus, HugoRenderer, Renderer, SkipEvaluator,
    StagedGenerator, ToolVersions,
};
use docbuilder_scheduler::{
    BuildAttempt, BuildQueue, BuildRunner, QueueError, RetryController, RetryPolicy,
};

fn exit_code(status: BuildStatus) -> i32 {
    match status {
        BuildStatus::Success | BuildStatus::Warning | BuildStatus::Skipped => 0,
        BuildStatus::Failed => 1,
        BuildStatus::Canceled => 130,
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; canceling");
            handle.cancel();
        }
    });
    cancel
}

struct FileSkipFactory {
    versions: ToolVersions,
}

impl SkipEvaluatorFactory for FileSkipFactory {
    fn create(&self, output_dir: &Path) -> SkipEvaluator {
        SkipEvaluator::new(
            Arc::new(JsonStateStore::for_output_dir(output_dir)),
            self.versions.clone(),
        )
    }
}

async fn build_service(config: &BuildConfig) -> BuildService {
    let mut fetcher = GitFetcher::new();
    if let Ok(token) = std::env::var("DOCBUILDER_GIT_TOKEN") {
        if !token.is_empty() {
            fetcher = fetcher.with_token(token);
        }
    }
    let renderer = Arc::new(HugoRenderer::new(config.hugo.binary.clone()));
    let versions = ToolVersions::current(renderer.version().await);
    let generator = StagedGenerator::new(Arc::new(fetcher), renderer);
    BuildService::new(Arc::new(generator))
        .with_skip_factory(Arc::new(FileSkipFactory { versions }))
}

pub async fn build(
    config_path: &Path,
    output: PathBuf,
    incremental: bool,
    skip_unchanged: bool,
) -> anyhow::Result<i32> {
    let config = BuildConfig::from_yaml_file(config_path)?;
    let cancel = cancel_on_ctrl_c();
    let service = build_service(&config).await;
    let request = BuildRequest {
        config: Some(Arc::new(config)),
        output_dir: output,
        incremental,
        options: BuildOptions { skip_if_unchanged: skip_unchanged },
    };

    let result = service.build(&cancel, &request).await?;
    match &result.report {
        Some(report) => println!("{}", report.summary_line()),
        None => println!("repos=0 files=0 nothing to build"),
    }
    Ok(exit_code(result.status))
}

pub fn validate(config_path: &Path) -> anyhow::Result<i32> {
    match BuildConfig::from_yaml_file(config_path) {
        Ok(config) => {
            println!(
                "{} OK: {} repositories",
                config_path.display(),
                config.repositories.len()
            );
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}: {err}", config_path.display());
            Ok(1)
        }
    }
}

/// Adapts the build service to the queue's runner seam.
struct ServiceRunner {
    service: BuildService,
    request: BuildRequest,
}

#[async_trait]
impl BuildRunner for ServiceRunner {
    async fn run_build(&self, cancel: &CancellationToken, _job: &BuildJob) -> BuildAttempt {
        match self.service.build(cancel, &self.request).await {
            Ok(result) => {
                let error = match result.status {
                    BuildStatus::Canceled => Some(Error::Canceled),
                    BuildStatus::Failed => {
                        let stage = result
                            .report
                            .as_ref()
                            .and_then(|r| r.causes.last().map(|c| c.stage));
                        Some(match stage {
                            Some(stage) => Error::Build {
                                stage,
                                message: "build failed".to_string(),
                            },
                            None => Error::Hugo("build failed".to_string()),
                        })
                    }
                    _ => None,
                };
                BuildAttempt {
                    report: result.report,
                    result: match error {
                        Some(err) => Err(err),
                        None => Ok(()),
                    },
                }
            }
            Err(err) => BuildAttempt {
                report: None,
                result: Err(err),
            },
        }
    }
}

/// Logs lifecycle events; the long-running mode's default sink.
struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn publish(&self, job_id: &JobId, event: BuildEvent) -> anyhow::Result<()> {
        match event {
            BuildEvent::BuildStarted {
                job_type,
                priority,
                worker_id,
            } => info!(job = %job_id, %job_type, %priority, worker = worker_id, "build started"),
            BuildEvent::BuildCompleted {
                duration,
                artifacts,
            } => info!(
                job = %job_id,
                duration_ms = duration.as_millis() as u64,
                files = artifacts.files,
                repositories = artifacts.repositories,
                "build completed"
            ),
            BuildEvent::BuildFailed { stage, error_msg } => warn!(
                job = %job_id,
                stage = stage.map(|s| s.to_string()).unwrap_or_default(),
                error = %error_msg,
                "build failed"
            ),
            BuildEvent::BuildReport { report } => info!(
                job = %job_id,
                outcome = %report.outcome,
                "build report ready"
            ),
        }
        Ok(())
    }
}

pub async fn watch(config_path: &Path, output: PathBuf, interval: u64) -> anyhow::Result<i32> {
    let config = BuildConfig::from_yaml_file(config_path)?;
    let service = build_service(&config).await;
    let request = BuildRequest {
        config: Some(Arc::new(config.clone())),
        output_dir: output,
        incremental: true,
        options: BuildOptions {
            skip_if_unchanged: config.skip_if_unchanged,
        },
    };

    let retry = RetryController::new(RetryPolicy::from(&config.retry));
    let queue = BuildQueue::new(
        config.queue.clone(),
        Arc::new(ServiceRunner { service, request }),
        retry,
        Arc::new(LoggingSink),
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    info!(interval_s = interval, "watching; builds run on schedule");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let job = BuildJob::new(JobType::Scheduled, JobPriority::Normal);
                match queue.enqueue(job) {
                    Ok(()) => {}
                    Err(QueueError::Full) => warn!("queue is full; scheduled build dropped"),
                    Err(err) => {
                        warn!(error = %err, "enqueue failed");
                        break;
                    }
                }
            }
        }
    }

    info!("shutting down");
    queue.shutdown().await;
    Ok(0)
}
