//! Report accumulation and atomic persistence.

use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use docbuilder_core::issue::Issue;
use docbuilder_core::report::BuildReport;
use docbuilder_core::stage::{StageError, StageOutcome};

use crate::PIPELINE_VERSION;

/// Persisted report file names under the output directory.
pub const REPORT_JSON: &str = "build-report.json";
pub const REPORT_TXT: &str = "build-report.txt";

/// Versions of the tools that produced a report.
#[derive(Debug, Clone)]
pub struct ToolVersions {
    pub docbuilder: String,
    pub hugo: Option<String>,
}

impl ToolVersions {
    pub fn current(hugo: Option<String>) -> Self {
        Self {
            docbuilder: env!("CARGO_PKG_VERSION").to_string(),
            hugo,
        }
    }
}

/// The narrow capability interface stage bodies mutate the report through.
#[derive(Debug)]
pub struct ReportBuilder {
    report: BuildReport,
}

impl ReportBuilder {
    pub fn new(versions: &ToolVersions) -> Self {
        let mut report = BuildReport::new();
        report.pipeline_version = Some(PIPELINE_VERSION.to_string());
        report.docbuilder_version = Some(versions.docbuilder.clone());
        report.hugo_version = versions.hugo.clone();
        Self { report }
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn into_report(self) -> BuildReport {
        self.report
    }

    pub fn add_issue(&mut self, issue: Issue) {
        self.report.add_issue(issue);
    }

    pub fn record_stage(
        &mut self,
        duration: Duration,
        outcome: &StageOutcome,
        error: Option<StageError>,
    ) {
        self.report.record_stage(duration, outcome, error);
    }

    pub fn set_repositories(&mut self, total: usize) {
        self.report.repositories = total;
    }

    pub fn set_clone_counts(&mut self, cloned: usize, failed: usize) {
        self.report.cloned_repositories = cloned;
        self.report.failed_repositories = failed;
    }

    pub fn add_skipped_repositories(&mut self, skipped: usize) {
        self.report.skipped_repositories += skipped;
    }

    pub fn set_files(&mut self, files: usize) {
        self.report.files = files;
    }

    pub fn set_rendered_pages(&mut self, pages: usize) {
        self.report.rendered_pages = pages;
    }

    pub fn set_static_rendered(&mut self, rendered: bool) {
        self.report.static_rendered = rendered;
    }

    pub fn set_doc_files_hash(&mut self, hash: impl Into<String>) {
        self.report.doc_files_hash = Some(hash.into());
    }

    pub fn set_config_hash(&mut self, hash: impl Into<String>) {
        self.report.config_hash = Some(hash.into());
    }

    pub fn set_skip_reason(&mut self, reason: impl Into<String>) {
        self.report.skip_reason = Some(reason.into());
    }

    pub fn finish(&mut self) {
        self.report.finish();
    }

    /// Persist the JSON report and the one-line text summary, both via
    /// temp-file plus rename. Returns the serialized JSON so callers can
    /// checksum exactly what landed on disk.
    pub async fn persist(&self, root: &Path) -> std::io::Result<String> {
        persist_report(&self.report, root).await
    }
}

/// Atomic write: a sibling temp file renamed over the target.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Persist a report under `root`. See [`ReportBuilder::persist`].
pub async fn persist_report(report: &BuildReport, root: &Path) -> std::io::Result<String> {
    tokio::fs::create_dir_all(root).await?;
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    write_atomic(&root.join(REPORT_JSON), json.as_bytes()).await?;
    write_atomic(&root.join(REPORT_TXT), report.summary_line().as_bytes()).await?;
    debug!(path = %root.join(REPORT_JSON).display(), "report persisted");
    Ok(json)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
