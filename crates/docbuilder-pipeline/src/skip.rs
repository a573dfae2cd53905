//! The skip evaluator: a rule chain deciding whether a full build can be
//! replaced by a synthesized report because nothing relevant changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docbuilder_config::BuildConfig;
use docbuilder_core::report::{BuildReport, SKIP_REASON_NO_CHANGES};
use docbuilder_core::repository::Repository;
use docbuilder_discovery::contains_markdown;

use crate::report::{persist_report, sha256_hex, write_atomic, REPORT_JSON, ToolVersions};
use crate::{CONTENT_DIR, PIPELINE_VERSION, PUBLIC_DIR};

/// File the skip state snapshot lives in, under the output directory.
pub const STATE_FILE: &str = ".docbuilder-state.json";

/// Persisted snapshot of the inputs the last build was produced from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipState {
    #[serde(default)]
    pub config_hash: String,
    #[serde(default)]
    pub repo_commits: BTreeMap<String, String>,
    #[serde(default)]
    pub repo_doc_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub global_doc_hash: String,
    #[serde(default)]
    pub report_checksum: String,
}

impl SkipState {
    pub fn is_empty(&self) -> bool {
        self.config_hash.is_empty()
            && self.repo_commits.is_empty()
            && self.repo_doc_hashes.is_empty()
            && self.global_doc_hash.is_empty()
            && self.report_checksum.is_empty()
    }
}

/// Loads and saves the skip state snapshot.
#[async_trait]
pub trait SkipStateStore: Send + Sync {
    /// Missing or corrupt state loads as the empty snapshot ("cannot
    /// skip"), never an error.
    async fn load(&self) -> SkipState;

    async fn save(&self, state: &SkipState) -> std::io::Result<()>;
}

/// JSON-file store next to the build artifacts.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn for_output_dir(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(STATE_FILE),
        }
    }
}

#[async_trait]
impl SkipStateStore for JsonStateStore {
    async fn load(&self) -> SkipState {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                debug!(path = %self.path.display(), error = %err, "skip state unreadable");
                SkipState::default()
            }),
            Err(_) => SkipState::default(),
        }
    }

    async fn save(&self, state: &SkipState) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(state).map_err(std::io::Error::other)?;
        write_atomic(&self.path, &json).await
    }
}

/// Inputs shared along the rule chain. `previous` is filled by the
/// previous-report rule for the rules behind it.
pub struct SkipContext<'a> {
    pub repositories: &'a [Repository],
    pub config_hash: &'a str,
    pub output_dir: &'a Path,
    pub state: &'a SkipState,
    pub versions: &'a ToolVersions,
    pub previous: Option<BuildReport>,
}

/// Outcome of one rule.
pub enum RuleCheck {
    Pass,
    Fail(String),
}

impl RuleCheck {
    fn fail(reason: impl Into<String>) -> Self {
        RuleCheck::Fail(reason.into())
    }
}

/// One link of the skip validation chain.
#[async_trait]
pub trait SkipRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck;
}

struct BasicPrerequisites;

#[async_trait]
impl SkipRule for BasicPrerequisites {
    fn name(&self) -> &'static str {
        "basic_prerequisites"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        if cx.repositories.is_empty() {
            return RuleCheck::fail("no repositories declared");
        }
        if cx.state.is_empty() {
            return RuleCheck::fail("no stored build state");
        }
        RuleCheck::Pass
    }
}

struct ConfigHashRule;

#[async_trait]
impl SkipRule for ConfigHashRule {
    fn name(&self) -> &'static str {
        "config_hash"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        if cx.config_hash.is_empty() {
            return RuleCheck::fail("current config hash is empty");
        }
        if cx.config_hash != cx.state.config_hash {
            return RuleCheck::fail("configuration changed since last build");
        }
        RuleCheck::Pass
    }
}

struct PublicDirectoryRule;

#[async_trait]
impl SkipRule for PublicDirectoryRule {
    fn name(&self) -> &'static str {
        "public_directory"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        let public = cx.output_dir.join(PUBLIC_DIR);
        match tokio::fs::metadata(&public).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return RuleCheck::fail("public is not a directory"),
            Err(_) => return RuleCheck::fail("public directory missing"),
        }
        match tokio::fs::read_dir(&public).await {
            Ok(mut reader) => match reader.next_entry().await {
                Ok(Some(_)) => RuleCheck::Pass,
                _ => RuleCheck::fail("public directory is empty"),
            },
            Err(_) => RuleCheck::fail("public directory unreadable"),
        }
    }
}

struct PreviousReportRule;

#[async_trait]
impl SkipRule for PreviousReportRule {
    fn name(&self) -> &'static str {
        "previous_report"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        let path = cx.output_dir.join(REPORT_JSON);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return RuleCheck::fail("previous report missing"),
        };
        if cx.state.report_checksum.is_empty()
            || sha256_hex(&bytes) != cx.state.report_checksum
        {
            return RuleCheck::fail("previous report checksum mismatch");
        }
        match serde_json::from_slice::<BuildReport>(&bytes) {
            Ok(report) => {
                cx.previous = Some(report);
                RuleCheck::Pass
            }
            Err(err) => RuleCheck::fail(format!("previous report invalid: {err}")),
        }
    }
}

struct VersionMismatchRule;

#[async_trait]
impl SkipRule for VersionMismatchRule {
    fn name(&self) -> &'static str {
        "version_mismatch"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        let Some(previous) = &cx.previous else {
            return RuleCheck::fail("previous report not loaded");
        };
        if previous.docbuilder_version.as_deref() != Some(cx.versions.docbuilder.as_str()) {
            return RuleCheck::fail("builder version changed");
        }
        if let Some(prev_hugo) = &previous.hugo_version {
            if cx.versions.hugo.as_deref() != Some(prev_hugo.as_str()) {
                return RuleCheck::fail("renderer version changed");
            }
        }
        RuleCheck::Pass
    }
}

struct ContentIntegrityRule;

#[async_trait]
impl SkipRule for ContentIntegrityRule {
    fn name(&self) -> &'static str {
        "content_integrity"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        let Some(previous) = &cx.previous else {
            return RuleCheck::fail("previous report not loaded");
        };
        if previous.files == 0 {
            return RuleCheck::Pass;
        }
        let content = cx.output_dir.join(CONTENT_DIR);
        match tokio::fs::metadata(&content).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return RuleCheck::fail("content directory missing"),
        }
        if !contains_markdown(&content) {
            return RuleCheck::fail("content directory holds no markdown");
        }
        RuleCheck::Pass
    }
}

struct GlobalDocHashRule;

#[async_trait]
impl SkipRule for GlobalDocHashRule {
    fn name(&self) -> &'static str {
        "global_doc_hash"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        let Some(previous) = &cx.previous else {
            return RuleCheck::fail("previous report not loaded");
        };
        let stored = &cx.state.global_doc_hash;
        let prior = previous.doc_files_hash.clone().unwrap_or_default();
        if !stored.is_empty() && !prior.is_empty() && *stored != prior {
            return RuleCheck::fail("global doc hash changed");
        }
        RuleCheck::Pass
    }
}

struct PerRepoDocHashRule;

#[async_trait]
impl SkipRule for PerRepoDocHashRule {
    fn name(&self) -> &'static str {
        "per_repo_doc_hash"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        if cx.repositories.len() == 1 {
            let repo = &cx.repositories[0];
            let Some(stored) = cx.state.repo_doc_hashes.get(&repo.name) else {
                return RuleCheck::fail(format!("no stored doc hash for {}", repo.name));
            };
            let Some(previous) = &cx.previous else {
                return RuleCheck::fail("previous report not loaded");
            };
            if previous.doc_files_hash.as_deref() != Some(stored.as_str()) {
                return RuleCheck::fail(format!("doc hash mismatch for {}", repo.name));
            }
            return RuleCheck::Pass;
        }
        for repo in cx.repositories {
            if !cx.state.repo_doc_hashes.contains_key(&repo.name) {
                return RuleCheck::fail(format!("no stored doc hash for {}", repo.name));
            }
        }
        RuleCheck::Pass
    }
}

struct CommitMetadataRule;

#[async_trait]
impl SkipRule for CommitMetadataRule {
    fn name(&self) -> &'static str {
        "commit_metadata"
    }

    async fn check(&self, cx: &mut SkipContext<'_>) -> RuleCheck {
        for repo in cx.repositories {
            if !cx.state.repo_commits.contains_key(&repo.name) {
                return RuleCheck::fail(format!("no recorded commit for {}", repo.name));
            }
        }
        RuleCheck::Pass
    }
}

fn standard_rules() -> Vec<Box<dyn SkipRule>> {
    vec![
        Box::new(BasicPrerequisites),
        Box::new(ConfigHashRule),
        Box::new(PublicDirectoryRule),
        Box::new(PreviousReportRule),
        Box::new(VersionMismatchRule),
        Box::new(ContentIntegrityRule),
        Box::new(GlobalDocHashRule),
        Box::new(PerRepoDocHashRule),
        Box::new(CommitMetadataRule),
    ]
}

/// Evaluates the rule chain in strict order; the first failing rule means
/// "cannot skip". The evaluator never raises errors.
pub struct SkipEvaluator {
    rules: Vec<Box<dyn SkipRule>>,
    store: Arc<dyn SkipStateStore>,
    versions: ToolVersions,
}

impl SkipEvaluator {
    pub fn new(store: Arc<dyn SkipStateStore>, versions: ToolVersions) -> Self {
        Self {
            rules: standard_rules(),
            store,
            versions,
        }
    }

    pub fn with_rules(mut self, rules: Vec<Box<dyn SkipRule>>) -> Self {
        self.rules = rules;
        self
    }

    /// Returns the synthesized skip report when every rule passes; `None`
    /// means the full pipeline must run.
    pub async fn evaluate(&self, config: &BuildConfig, output_dir: &Path) -> Option<BuildReport> {
        let state = self.store.load().await;
        let config_hash = config.hash();
        let mut cx = SkipContext {
            repositories: &config.repositories,
            config_hash: &config_hash,
            output_dir,
            state: &state,
            versions: &self.versions,
            previous: None,
        };

        for rule in &self.rules {
            match rule.check(&mut cx).await {
                RuleCheck::Pass => {}
                RuleCheck::Fail(reason) => {
                    debug!(rule = rule.name(), reason = %reason, "cannot skip build");
                    return None;
                }
            }
        }

        let previous = cx.previous?;
        let mut report = BuildReport::new();
        report.repositories = previous.repositories;
        report.files = previous.files;
        report.rendered_pages = previous.rendered_pages;
        report.doc_files_hash = previous.doc_files_hash.clone();
        report.static_rendered = previous.static_rendered;
        report.skip_reason = Some(SKIP_REASON_NO_CHANGES.to_string());
        report.config_hash = Some(config_hash);
        report.pipeline_version = Some(PIPELINE_VERSION.to_string());
        report.docbuilder_version = Some(self.versions.docbuilder.clone());
        report.hugo_version = previous
            .hugo_version
            .clone()
            .or_else(|| self.versions.hugo.clone());
        report.finish();

        let json = match persist_report(&report, output_dir).await {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "could not persist skip report; building instead");
                return None;
            }
        };

        let mut refreshed = state.clone();
        refreshed.report_checksum = sha256_hex(json.as_bytes());
        if let Some(hash) = &report.doc_files_hash {
            refreshed.global_doc_hash = hash.clone();
        }
        if let Err(err) = self.store.save(&refreshed).await {
            warn!(error = %err, "could not refresh skip state");
        }

        info!(
            repositories = report.repositories,
            files = report.files,
            "build skipped; inputs unchanged"
        );
        Some(report)
    }
}
