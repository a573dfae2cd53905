//! The pluggable site generator: the production implementation runs the
//! staged pipeline against a workspace and persists the report.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docbuilder_config::BuildConfig;
use docbuilder_core::observer::{BuildObserver, NoopObserver};
use docbuilder_core::report::{BuildReport, Outcome};
use docbuilder_core::state::BuildState;
use docbuilder_core::{Error, Result};
use docbuilder_git::Fetcher;

use crate::renderer::Renderer;
use crate::report::{ReportBuilder, ToolVersions, sha256_hex};
use crate::runner::StageRunner;
use crate::skip::{JsonStateStore, SkipStateStore};
use crate::stages::{StageContext, StageRegistry};

/// Runs one build against a prepared workspace and returns its report.
#[async_trait]
pub trait SiteGenerator: Send + Sync {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        config: &BuildConfig,
        workspace: &Path,
        output_dir: &Path,
    ) -> Result<BuildReport>;
}

/// The staged pipeline generator. Stage failures land in the report's
/// outcome; only infrastructure failures (report persistence) surface as
/// errors.
pub struct StagedGenerator {
    fetcher: Arc<dyn Fetcher>,
    renderer: Arc<dyn Renderer>,
    observer: Arc<dyn BuildObserver>,
}

impl StagedGenerator {
    pub fn new(fetcher: Arc<dyn Fetcher>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            fetcher,
            renderer,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }
}

#[async_trait]
impl SiteGenerator for StagedGenerator {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        config: &BuildConfig,
        workspace: &Path,
        output_dir: &Path,
    ) -> Result<BuildReport> {
        let versions = ToolVersions::current(self.renderer.version().await);
        let config_hash = config.hash();

        let mut state = BuildState::new(
            config.repositories.clone(),
            workspace.to_path_buf(),
            config_hash.clone(),
        );
        let mut report = ReportBuilder::new(&versions);
        report.set_config_hash(config_hash.clone());
        report.set_repositories(config.repositories.len());

        let cx = StageContext {
            config: Arc::new(config.clone()),
            workspace: workspace.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            cancel: cancel.clone(),
        };
        let registry = StageRegistry::standard(self.fetcher.clone(), self.renderer.clone());
        let runner = StageRunner::new(registry, self.observer.clone());

        // The runner finishes the report on every path; its error is
        // already reflected in the outcome.
        let _ = runner.run(&cx, &mut state, &mut report).await;

        let json = report
            .persist(output_dir)
            .await
            .map_err(|err| Error::filesystem("persist report", err))?;

        let outcome = report.report().outcome;
        let skipped_early = report.report().skip_reason.is_some();
        if matches!(outcome, Outcome::Success | Outcome::Warning) && !skipped_early {
            let store = JsonStateStore::for_output_dir(output_dir);
            let mut refreshed = store.load().await;
            refreshed.config_hash = config_hash;
            refreshed.repo_commits = state.git.post_heads.clone();
            refreshed.repo_doc_hashes = state.docs.per_repo_hashes.clone();
            refreshed.global_doc_hash = state.docs.doc_files_hash.clone();
            refreshed.report_checksum = sha256_hex(json.as_bytes());
            if let Err(err) = store.save(&refreshed).await {
                warn!(error = %err, "could not refresh skip state after build");
            } else {
                debug!("skip state refreshed");
            }
        }

        Ok(report.into_report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use docbuilder_core::issue::{IssueCode, Severity};
    use docbuilder_core::report::SKIP_REASON_NO_CHANGES;
    use docbuilder_core::repository::{CloneStrategy, Repository};
    use docbuilder_core::stage::{RenderError, Stage};
    use docbuilder_git::{FetchError, FetchResult};

    use crate::renderer::RenderSummary;
    use crate::report::REPORT_JSON;
    use crate::skip::STATE_FILE;
    use crate::{CONTENT_DIR, PUBLIC_DIR};

    /// Fetcher that fabricates checkouts on disk instead of talking to git.
    ///
    /// Behavior per repository name prefix: `auth-` fails with an auth
    /// error, `rate-` fails rate-limited, `pinned-` reports an unmoved
    /// head. `cancel_on_call`, when set, cancels the token on that
    /// (zero-based) call and returns a canceled fetch.
    struct FakeFetcher {
        cancel_on_call: Option<usize>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self {
                cancel_on_call: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(
            &self,
            cancel: &CancellationToken,
            _strategy: CloneStrategy,
            repo: &Repository,
            workspace: &Path,
        ) -> std::result::Result<FetchResult, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_on_call == Some(call) {
                cancel.cancel();
                return Err(FetchError::Canceled);
            }
            if repo.name.starts_with("auth-") {
                return Err(FetchError::Command {
                    op: "clone",
                    stderr: "fatal: Authentication failed".to_string(),
                });
            }
            if repo.name.starts_with("rate-") {
                return Err(FetchError::Command {
                    op: "clone",
                    stderr: "remote: API rate limit exceeded".to_string(),
                });
            }

            let path = workspace.join(&repo.name);
            tokio::fs::create_dir_all(path.join("docs")).await?;
            tokio::fs::write(
                path.join("docs/intro.md"),
                "---\ntitle: Intro\n---\nWelcome.\n",
            )
            .await?;
            tokio::fs::write(path.join("docs/guide.md"), "# Guide\n").await?;

            let (pre, post) = if repo.name.starts_with("pinned-") {
                (Some("abc123".to_string()), Some("abc123".to_string()))
            } else {
                (None, Some("def456".to_string()))
            };
            Ok(FetchResult {
                path,
                pre_head: pre.clone(),
                post_head: post,
                commit_date: Some(chrono::Utc::now()),
                updated: pre.is_none(),
            })
        }
    }

    /// Renderer that writes one page per staged markdown file.
    struct FakeRenderer;

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(
            &self,
            _cancel: &CancellationToken,
            _source: &Path,
            destination: &Path,
        ) -> std::result::Result<RenderSummary, RenderError> {
            tokio::fs::create_dir_all(destination)
                .await
                .map_err(|e| RenderError(e.to_string()))?;
            tokio::fs::write(destination.join("index.html"), "<html>")
                .await
                .map_err(|e| RenderError(e.to_string()))?;
            Ok(RenderSummary {
                pages: 3,
                static_files: 0,
            })
        }

        async fn version(&self) -> Option<String> {
            Some("0.128.0".to_string())
        }
    }

    fn repo(name: &str) -> Repository {
        Repository {
            name: name.into(),
            url: format!("https://github.com/acme/{name}.git"),
            branch: "main".into(),
            commit: None,
            docs_dirs: vec!["docs".into()],
            section: None,
        }
    }

    fn config(repos: Vec<Repository>) -> BuildConfig {
        BuildConfig {
            repositories: repos,
            ..BuildConfig::default()
        }
    }

    fn generator(fetcher: FakeFetcher) -> StagedGenerator {
        StagedGenerator::new(Arc::new(fetcher), Arc::new(FakeRenderer))
    }

    #[tokio::test]
    async fn test_full_build_produces_site_and_report() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = config(vec![repo("api"), repo("infra")]);

        let report = generator(FakeFetcher::new())
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.repositories, 2);
        assert_eq!(report.cloned_repositories, 2);
        assert_eq!(report.failed_repositories, 0);
        assert_eq!(report.files, 4);
        assert_eq!(report.rendered_pages, 3);
        assert!(report.static_rendered);
        assert!(report.doc_files_hash.is_some());
        assert_eq!(report.hugo_version.as_deref(), Some("0.128.0"));
        // Every executed stage is timed and tallied.
        for stage in Stage::ALL {
            assert!(report.stage_durations.contains_key(&stage), "{stage}");
            assert!(report.stage_counts.contains_key(&stage), "{stage}");
        }

        // Staged tree, rendered site, report, and refreshed skip state.
        let staged = output
            .path()
            .join(CONTENT_DIR)
            .join("docs/api/guide.md");
        let content = std::fs::read_to_string(&staged).unwrap();
        assert!(content.starts_with("---\n"));
        assert!(content.contains("fingerprint:"));
        assert!(output.path().join(PUBLIC_DIR).join("index.html").exists());
        assert!(output.path().join(REPORT_JSON).exists());
        let state = JsonStateStore::for_output_dir(output.path()).load().await;
        assert!(!state.is_empty());
        assert_eq!(state.repo_commits.len(), 2);
        assert!(output.path().join(STATE_FILE).exists());
    }

    #[tokio::test]
    async fn test_all_clones_failed_is_a_warning_build() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = config(vec![repo("auth-one"), repo("auth-two")]);

        let report = generator(FakeFetcher::new())
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Warning);
        assert_eq!(report.cloned_repositories, 0);
        assert_eq!(report.failed_repositories, 2);
        assert!(report.errors.is_empty());

        let auth_issues: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.code == IssueCode::AuthFailure)
            .collect();
        assert_eq!(auth_issues.len(), 2);
        assert!(auth_issues.iter().all(|i| i.severity == Severity::Error));
        assert!(
            report
                .issues
                .iter()
                .any(|i| i.code == IssueCode::AllClonesFailed)
        );
        // Nothing was cloned, so there are no commits to remember.
        let state = JsonStateStore::for_output_dir(output.path()).load().await;
        assert!(state.repo_commits.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_clone_failure_is_retryable() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = config(vec![repo("rate-one"), repo("api")]);

        let report = generator(FakeFetcher::new())
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Warning);
        assert_eq!(report.failed_repositories, 1);
        let rate_issue = report
            .issues
            .iter()
            .find(|i| i.code == IssueCode::RateLimit)
            .expect("per-repo rate limit issue");
        assert!(rate_issue.transient);
        let summary = report
            .issues
            .iter()
            .find(|i| i.code == IssueCode::PartialClone)
            .expect("partial clone summary issue");
        assert!(summary.transient);
        // This is what the retry controller scans before re-running.
        assert!(report.causes.iter().any(|c| c.is_transient()));
    }

    #[tokio::test]
    async fn test_auth_clone_failure_is_not_retryable() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = config(vec![repo("auth-one"), repo("api")]);

        let report = generator(FakeFetcher::new())
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Warning);
        assert!(!report.causes.iter().any(|c| c.is_transient()));
    }

    #[tokio::test]
    async fn test_cancellation_mid_clone() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = config(vec![repo("api"), repo("infra"), repo("web")]);

        let mut fetcher = FakeFetcher::new();
        fetcher.cancel_on_call = Some(1);
        // One worker makes the cancellation point deterministic.
        let mut config = config;
        config.clone.concurrency = 1;

        let report = generator(fetcher)
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Canceled);
        let canceled: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.code == IssueCode::BuildCanceled)
            .collect();
        assert_eq!(canceled.len(), 1);
        // Only the clone stage ran.
        assert!(report.stage_durations.contains_key(&Stage::CloneRepos));
        assert!(!report.stage_durations.contains_key(&Stage::DiscoverDocs));
        // The report still persisted.
        assert!(output.path().join(REPORT_JSON).exists());
    }

    #[tokio::test]
    async fn test_unmoved_heads_short_circuit_when_output_valid() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let config = config(vec![repo("pinned-api")]);

        // First build lays down a valid site.
        generator(FakeFetcher::new())
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        // Second build sees pre == post everywhere and stops after clone.
        let report = generator(FakeFetcher::new())
            .generate(
                &CancellationToken::new(),
                &config,
                workspace.path(),
                output.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.skip_reason.as_deref(), Some(SKIP_REASON_NO_CHANGES));
        assert_eq!(report.skipped_repositories, 1);
        assert!(!report.stage_durations.contains_key(&Stage::DiscoverDocs));
        assert!(!report.stage_durations.contains_key(&Stage::RunHugo));
    }
}
