//! Observer capability set for the stage runner.

use std::time::Duration;

use crate::report::BuildReport;
use crate::stage::{Stage, StageOutcome};

/// Hooks delivered in stage order during a build. Implementations are
/// metrics recorders, loggers, or tracers injected at the service
/// boundary; the default is a no-op.
pub trait BuildObserver: Send + Sync {
    fn on_stage_start(&self, _stage: Stage) {}

    fn on_stage_complete(&self, _stage: Stage, _duration: Duration, _outcome: &StageOutcome) {}

    fn on_build_complete(&self, _report: &BuildReport) {}
}

/// The default observer: observes nothing.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {}
