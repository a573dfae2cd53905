//! Pipeline stage names, stage errors, and stage outcome classification types.

use serde::{Deserialize, Serialize};

use crate::issue::IssueCode;

/// A named step of the build pipeline, in execution order.
///
/// The serialized names are stable: they key `stage_durations`,
/// `stage_counts`, and `stage_error_kinds` in the persisted report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PrepareOutput,
    CloneRepos,
    DiscoverDocs,
    GenerateConfig,
    Layouts,
    CopyContent,
    Indexes,
    RunHugo,
    PostProcess,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 9] = [
        Stage::PrepareOutput,
        Stage::CloneRepos,
        Stage::DiscoverDocs,
        Stage::GenerateConfig,
        Stage::Layouts,
        Stage::CopyContent,
        Stage::Indexes,
        Stage::RunHugo,
        Stage::PostProcess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PrepareOutput => "prepare_output",
            Stage::CloneRepos => "clone_repos",
            Stage::DiscoverDocs => "discover_docs",
            Stage::GenerateConfig => "generate_config",
            Stage::Layouts => "layouts",
            Stage::CopyContent => "copy_content",
            Stage::Indexes => "indexes",
            Stage::RunHugo => "run_hugo",
            Stage::PostProcess => "post_process",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Aborts the pipeline.
    Fatal,
    /// Recorded; the pipeline continues.
    Warning,
    /// Aborts the pipeline and marks the build canceled.
    Canceled,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageErrorKind::Fatal => f.write_str("fatal"),
            StageErrorKind::Warning => f.write_str("warning"),
            StageErrorKind::Canceled => f.write_str("canceled"),
        }
    }
}

/// The primary error vehicle through the pipeline: a stage name, a failure
/// kind, and the wrapped cause.
///
/// The cause is shared so the same error can be retained on the report
/// (where the retry controller inspects it) and returned to the caller
/// without flattening the chain.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: Stage,
    pub kind: StageErrorKind,
    pub source: std::sync::Arc<anyhow::Error>,
}

impl StageError {
    pub fn fatal(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Fatal,
            source: std::sync::Arc::new(source.into()),
        }
    }

    pub fn warning(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Warning,
            source: std::sync::Arc::new(source.into()),
        }
    }

    pub fn canceled(stage: Stage) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Canceled,
            source: std::sync::Arc::new(anyhow::anyhow!("stage {stage} canceled")),
        }
    }

    /// Whether retrying this failure with backoff is expected to succeed.
    ///
    /// Clone errors are transient when their cause carries a transient
    /// classification (rate limits, network timeouts). Render errors are
    /// transient when the render sentinel is in the cause chain. Discovery
    /// errors are transient only when non-fatal. Canceled errors are never
    /// transient.
    pub fn is_transient(&self) -> bool {
        if self.kind == StageErrorKind::Canceled {
            return false;
        }
        match self.stage {
            Stage::CloneRepos => self.source.chain().any(|e| {
                e.downcast_ref::<ClassifiedError>()
                    .is_some_and(|c| c.code.is_transient_at_clone())
            }),
            Stage::RunHugo => self
                .source
                .chain()
                .any(|e| e.downcast_ref::<RenderError>().is_some()),
            Stage::DiscoverDocs => self.kind != StageErrorKind::Fatal,
            _ => false,
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} {}: {}", self.stage, self.kind, self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &anyhow::Error = &self.source;
        Some(AsRef::<dyn std::error::Error>::as_ref(cause))
    }
}

/// A failure that has been classified into a stable issue code.
///
/// Produced by the git fetcher's classifier and wrapped into stage errors
/// so `StageError::is_transient` can discriminate without depending on the
/// crate that did the classifying.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ClassifiedError {
    pub code: IssueCode,
    pub message: String,
}

/// Sentinel wrapped into render-stage failures; its presence in a cause
/// chain marks the failure transient.
#[derive(Debug, thiserror::Error)]
#[error("renderer failed: {0}")]
pub struct RenderError(pub String);

/// Classified result of a single stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Warning,
    Fatal,
    Canceled,
}

impl From<StageErrorKind> for StageStatus {
    fn from(kind: StageErrorKind) -> Self {
        match kind {
            StageErrorKind::Fatal => StageStatus::Fatal,
            StageErrorKind::Warning => StageStatus::Warning,
            StageErrorKind::Canceled => StageStatus::Canceled,
        }
    }
}

/// Outcome of classifying one stage result (spec'd by the stage runner).
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub code: Option<IssueCode>,
    pub message: Option<String>,
    /// When set, the pipeline stops after recording this stage.
    pub abort: bool,
}

impl StageOutcome {
    pub fn success(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Success,
            code: None,
            message: None,
            abort: false,
        }
    }
}
