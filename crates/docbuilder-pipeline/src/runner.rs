//! Ordered, cancellable stage execution with per-stage classification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use docbuilder_core::issue::IssueCode;
use docbuilder_core::observer::BuildObserver;
use docbuilder_core::report::{BuildReport, SKIP_REASON_NO_CHANGES};
use docbuilder_core::stage::{Stage, StageError, StageErrorKind, StageOutcome, StageStatus};
use docbuilder_core::state::BuildState;

use crate::report::{REPORT_JSON, ReportBuilder};
use crate::stages::{StageContext, StageRegistry};
use crate::PUBLIC_DIR;

/// Executes the registered stages in order against a shared build state.
pub struct StageRunner {
    registry: StageRegistry,
    observer: Arc<dyn BuildObserver>,
}

impl StageRunner {
    pub fn new(registry: StageRegistry, observer: Arc<dyn BuildObserver>) -> Self {
        Self { registry, observer }
    }

    /// Run every stage. The report is finished and `on_build_complete`
    /// delivered on every exit path; the returned error mirrors what was
    /// already recorded.
    pub async fn run(
        &self,
        cx: &StageContext,
        state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> Result<(), StageError> {
        for command in self.registry.commands() {
            let stage = command.stage();

            if cx.cancel.is_cancelled() {
                let err = StageError::canceled(stage);
                let outcome = classify(stage, &err, state, report.report());
                report.record_stage(Duration::ZERO, &outcome, Some(err.clone()));
                self.observer
                    .on_stage_complete(stage, Duration::ZERO, &outcome);
                warn!(stage = %stage, "build canceled before stage");
                self.finalize(report);
                return Err(err);
            }

            self.observer.on_stage_start(stage);
            debug!(stage = %stage, "stage started");
            let started = Instant::now();
            let result = command.run(cx, state, report).await;
            let duration = started.elapsed();

            match result {
                Ok(()) => {
                    let outcome = StageOutcome::success(stage);
                    report.record_stage(duration, &outcome, None);
                    self.observer.on_stage_complete(stage, duration, &outcome);
                    info!(
                        stage = %stage,
                        duration_ms = duration.as_millis() as u64,
                        "stage completed"
                    );
                }
                Err(err) => {
                    let stage_err = match err.downcast::<StageError>() {
                        Ok(stage_err) => stage_err,
                        Err(other) => StageError::fatal(stage, other),
                    };
                    let outcome = classify(stage, &stage_err, state, report.report());
                    match stage_err.kind {
                        StageErrorKind::Warning => {
                            warn!(stage = %stage, error = %stage_err.source, "stage completed with warning")
                        }
                        _ => error!(stage = %stage, error = %stage_err.source, "stage failed"),
                    }
                    report.record_stage(duration, &outcome, Some(stage_err.clone()));
                    self.observer.on_stage_complete(stage, duration, &outcome);
                    if outcome.abort {
                        self.finalize(report);
                        return Err(stage_err);
                    }
                }
            }

            // Early exit: nothing moved and the existing site is usable.
            if stage == Stage::CloneRepos
                && state.git.all_repos_unchanged()
                && output_valid_for_skip(cx).await
            {
                info!("no repository changes; skipping remaining stages");
                report.set_skip_reason(SKIP_REASON_NO_CHANGES);
                self.finalize(report);
                return Ok(());
            }
        }

        self.finalize(report);
        Ok(())
    }

    fn finalize(&self, report: &mut ReportBuilder) {
        report.finish();
        self.observer.on_build_complete(report.report());
    }
}

/// Select the issue code and abort behavior for a failed stage.
fn classify(
    stage: Stage,
    err: &StageError,
    state: &BuildState,
    report: &BuildReport,
) -> StageOutcome {
    if err.kind == StageErrorKind::Canceled {
        return StageOutcome {
            stage,
            status: StageStatus::Canceled,
            code: Some(IssueCode::BuildCanceled),
            message: Some(format!("build canceled during {stage}")),
            abort: true,
        };
    }

    let code = match stage {
        Stage::CloneRepos => {
            if report.cloned_repositories == 0 {
                IssueCode::AllClonesFailed
            } else if report.failed_repositories > 0 {
                IssueCode::PartialClone
            } else {
                IssueCode::CloneFailure
            }
        }
        Stage::DiscoverDocs => {
            if state.git.repo_paths.is_empty() {
                IssueCode::NoRepositories
            } else {
                IssueCode::DiscoveryFailure
            }
        }
        Stage::RunHugo => IssueCode::HugoExecution,
        _ => IssueCode::GenericStageError,
    };

    StageOutcome {
        stage,
        status: err.kind.into(),
        code: Some(code),
        message: Some(err.source.to_string()),
        abort: err.kind == StageErrorKind::Fatal,
    }
}

/// Cheap mid-pipeline probe: rendered output present and a readable
/// previous report. The full rule chain belongs to the skip evaluator.
async fn output_valid_for_skip(cx: &StageContext) -> bool {
    let public = cx.output_dir.join(PUBLIC_DIR);
    let mut has_output = false;
    if let Ok(mut reader) = tokio::fs::read_dir(&public).await {
        has_output = matches!(reader.next_entry().await, Ok(Some(_)));
    }
    if !has_output {
        return false;
    }
    match tokio::fs::read(cx.output_dir.join(REPORT_JSON)).await {
        Ok(bytes) => serde_json::from_slice::<BuildReport>(&bytes).is_ok(),
        Err(_) => false,
    }
}
