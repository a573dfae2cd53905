//! Retry control: re-run builds whose failure is classified transient.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use docbuilder_config::RetrySettings;
use docbuilder_core::Error;
use docbuilder_core::job::{BackoffKind, BuildJob};
use docbuilder_core::report::BuildReport;

/// A build invocation's outcome: the report (when one was produced) plus
/// the terminal result.
#[derive(Debug)]
pub struct BuildAttempt {
    pub report: Option<BuildReport>,
    pub result: Result<(), Error>,
}

impl BuildAttempt {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// The thing the queue actually runs for each job. The production
/// implementation wraps the build service.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run_build(&self, cancel: &CancellationToken, job: &BuildJob) -> BuildAttempt;
}

/// Backoff policy bounding retry attempts per build.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: BackoffKind,
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::Fixed,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_retries: 0,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            backoff: settings.backoff,
            initial: settings.initial_delay(),
            max: settings.max_delay(),
            max_retries: settings.max_retries,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), bounded by `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            BackoffKind::Fixed => self.initial,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.min(31));
                self.initial.saturating_mul(factor)
            }
        };
        raw.min(self.max)
    }
}

/// Applies a [`RetryPolicy`] around a [`BuildRunner`].
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run the build, retrying while the failure is transient and the
    /// budget allows. The retry count lands on the report; exhausting the
    /// budget after at least one retry sets `retries_exhausted`.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        runner: &dyn BuildRunner,
        job: &BuildJob,
    ) -> BuildAttempt {
        let mut retries: u32 = 0;
        loop {
            let mut attempt = runner.run_build(cancel, job).await;
            if attempt.result.is_ok() {
                if retries > 0 {
                    if let Some(report) = attempt.report.as_mut() {
                        report.retries = retries;
                    }
                }
                return attempt;
            }

            let transient = attempt
                .report
                .as_ref()
                .is_some_and(|r| r.causes.iter().any(|c| c.is_transient()));
            if !transient || retries >= self.policy.max_retries {
                if retries > 0 {
                    if let Some(report) = attempt.report.as_mut() {
                        report.retries = retries;
                        report.retries_exhausted = true;
                    }
                }
                debug!(
                    job = %job.id,
                    retries,
                    transient,
                    "build failed; not retrying"
                );
                return attempt;
            }

            let delay = self.policy.delay(retries);
            info!(
                job = %job.id,
                attempt = retries + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying transient build failure"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    if retries > 0 {
                        if let Some(report) = attempt.report.as_mut() {
                            report.retries = retries;
                        }
                    }
                    return attempt;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            retries += 1;
        }
    }
}
