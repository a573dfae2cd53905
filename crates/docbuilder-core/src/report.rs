//! The build report: schema v1 of the persisted observational record.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::issue::Issue;
use crate::stage::{Stage, StageError, StageErrorKind, StageOutcome, StageStatus};

/// Current report schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// The skip reason recorded when nothing relevant changed.
pub const SKIP_REASON_NO_CHANGES: &str = "no_changes";

/// Derived overall outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Success,
    Warning,
    Failed,
    Canceled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Warning => f.write_str("warning"),
            Outcome::Failed => f.write_str("failed"),
            Outcome::Canceled => f.write_str("canceled"),
        }
    }
}

/// Per-stage result tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub success: u32,
    pub warning: u32,
    pub fatal: u32,
    pub canceled: u32,
}

impl StageCounts {
    fn record(&mut self, status: StageStatus) {
        match status {
            StageStatus::Success => self.success += 1,
            StageStatus::Warning => self.warning += 1,
            StageStatus::Fatal => self.fatal += 1,
            StageStatus::Canceled => self.canceled += 1,
        }
    }
}

/// Accumulated record of one build. Created when the build starts, mutated
/// through the report-builder methods, finalized exactly once.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildReport {
    pub schema_version: u32,
    pub repositories: usize,
    pub files: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Stage wall time in nanoseconds.
    pub stage_durations: BTreeMap<Stage, u64>,
    pub stage_error_kinds: BTreeMap<Stage, StageErrorKind>,
    pub cloned_repositories: usize,
    pub failed_repositories: usize,
    pub skipped_repositories: usize,
    pub rendered_pages: usize,
    pub stage_counts: BTreeMap<Stage, StageCounts>,
    pub outcome: Outcome,
    pub static_rendered: bool,
    pub retries: u32,
    pub retries_exhausted: bool,
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_files_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docbuilder_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugo_version: Option<String>,

    /// Typed causes retained for outcome derivation and the retry
    /// controller's transient scan. Not part of the wire schema.
    #[serde(skip)]
    pub causes: Vec<StageError>,
    #[serde(skip)]
    finished: bool,
}

impl BuildReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            repositories: 0,
            files: 0,
            start: now,
            end: now,
            errors: Vec::new(),
            warnings: Vec::new(),
            stage_durations: BTreeMap::new(),
            stage_error_kinds: BTreeMap::new(),
            cloned_repositories: 0,
            failed_repositories: 0,
            skipped_repositories: 0,
            rendered_pages: 0,
            stage_counts: BTreeMap::new(),
            outcome: Outcome::Success,
            static_rendered: false,
            retries: 0,
            retries_exhausted: false,
            issues: Vec::new(),
            skip_reason: None,
            doc_files_hash: None,
            config_hash: None,
            pipeline_version: None,
            docbuilder_version: None,
            hugo_version: None,
            causes: Vec::new(),
            finished: false,
        }
    }

    /// Append a structured issue without touching the error lists.
    pub fn add_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    /// Record a finished stage: duration, tally, and, when the stage
    /// failed, the classified issue plus the causal error mirrored into
    /// `errors`/`warnings` by severity.
    pub fn record_stage(
        &mut self,
        duration: Duration,
        outcome: &StageOutcome,
        error: Option<StageError>,
    ) {
        let stage = outcome.stage;
        self.stage_durations
            .insert(stage, duration.as_nanos().min(u64::MAX as u128) as u64);
        self.stage_counts.entry(stage).or_default().record(outcome.status);

        if let Some(cause) = error {
            self.stage_error_kinds.insert(stage, cause.kind);
            if let Some(code) = outcome.code {
                let severity = match cause.kind {
                    StageErrorKind::Warning => crate::issue::Severity::Warning,
                    _ => crate::issue::Severity::Error,
                };
                let message = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| cause.source.to_string());
                self.issues.push(
                    Issue::new(code, stage, severity, message)
                        .with_transient(cause.is_transient()),
                );
            }
            match cause.kind {
                StageErrorKind::Warning => self.warnings.push(cause.to_string()),
                _ => self.errors.push(cause.to_string()),
            }
            self.causes.push(cause);
        }
    }

    /// Derive the overall outcome from the recorded errors and warnings.
    pub fn derived_outcome(&self) -> Outcome {
        if self
            .causes
            .iter()
            .any(|c| c.kind == StageErrorKind::Canceled)
        {
            Outcome::Canceled
        } else if !self.errors.is_empty() {
            Outcome::Failed
        } else if !self.warnings.is_empty() {
            Outcome::Warning
        } else {
            Outcome::Success
        }
    }

    /// Set the end time and derive the outcome. Idempotent: the first call
    /// wins and later calls change nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.end = Utc::now();
        self.outcome = self.derived_outcome();
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// The one-line text summary persisted next to the JSON report.
    pub fn summary_line(&self) -> String {
        format!(
            "repos={} files={} duration={}ms errors={} warnings={} stages={} rendered={} outcome={}",
            self.repositories,
            self.files,
            self.duration().num_milliseconds().max(0),
            self.errors.len(),
            self.warnings.len(),
            self.stage_durations.len(),
            self.rendered_pages,
            self.outcome,
        )
    }
}

impl Default for BuildReport {
    fn default() -> Self {
        Self::new()
    }
}
