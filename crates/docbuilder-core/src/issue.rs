//! The stable, append-only issue taxonomy of the build report.

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Machine-parseable issue codes. The enumeration is append-only: codes are
/// never renamed or removed once a report containing them has shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    CloneFailure,
    PartialClone,
    AllClonesFailed,
    DiscoveryFailure,
    NoRepositories,
    HugoExecution,
    BuildCanceled,
    GenericStageError,
    AuthFailure,
    RepoNotFound,
    UnsupportedProtocol,
    RemoteDiverged,
    RateLimit,
    NetworkTimeout,
}

impl IssueCode {
    /// Rate limits and network timeouts are the only clone-stage failures
    /// expected to clear on retry.
    pub fn is_transient_at_clone(&self) -> bool {
        matches!(self, IssueCode::RateLimit | IssueCode::NetworkTimeout)
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueCode::CloneFailure => "CLONE_FAILURE",
            IssueCode::PartialClone => "PARTIAL_CLONE",
            IssueCode::AllClonesFailed => "ALL_CLONES_FAILED",
            IssueCode::DiscoveryFailure => "DISCOVERY_FAILURE",
            IssueCode::NoRepositories => "NO_REPOSITORIES",
            IssueCode::HugoExecution => "HUGO_EXECUTION",
            IssueCode::BuildCanceled => "BUILD_CANCELED",
            IssueCode::GenericStageError => "GENERIC_STAGE_ERROR",
            IssueCode::AuthFailure => "AUTH_FAILURE",
            IssueCode::RepoNotFound => "REPO_NOT_FOUND",
            IssueCode::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            IssueCode::RemoteDiverged => "REMOTE_DIVERGED",
            IssueCode::RateLimit => "RATE_LIMIT",
            IssueCode::NetworkTimeout => "NETWORK_TIMEOUT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A structured entry in the report taxonomy, distinct from the free-form
/// error strings that accompany it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
    pub transient: bool,
}

impl Issue {
    pub fn new(code: IssueCode, stage: Stage, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            severity,
            message: message.into(),
            transient: stage == Stage::CloneRepos && code.is_transient_at_clone(),
        }
    }

    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }
}
