//! The top-level build service: validation, skip evaluation, workspace
//! lifecycle, and translation into a caller-facing result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use docbuilder_config::BuildConfig;
use docbuilder_core::report::{BuildReport, Outcome};
use docbuilder_core::repository::CloneStrategy;
use docbuilder_core::{Error, Result};

use crate::generator::SiteGenerator;
use crate::skip::SkipEvaluator;
use crate::workspace::Workspace;

/// Caller-facing build status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Warning,
    Failed,
    Canceled,
    Skipped,
}

impl From<Outcome> for BuildStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => BuildStatus::Success,
            Outcome::Warning => BuildStatus::Warning,
            Outcome::Failed => BuildStatus::Failed,
            Outcome::Canceled => BuildStatus::Canceled,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub skip_if_unchanged: bool,
}

/// One build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub config: Option<Arc<BuildConfig>>,
    pub output_dir: PathBuf,
    pub incremental: bool,
    pub options: BuildOptions,
}

/// What a build produced.
#[derive(Debug)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub repositories: usize,
    pub files_processed: usize,
    pub repositories_skipped: usize,
    pub duration: Duration,
    pub output_path: PathBuf,
    pub report: Option<BuildReport>,
}

/// Builds a skip evaluator scoped to an output directory.
pub trait SkipEvaluatorFactory: Send + Sync {
    fn create(&self, output_dir: &Path) -> SkipEvaluator;
}

/// Orchestrates one build end to end.
pub struct BuildService {
    generator: Arc<dyn SiteGenerator>,
    skip_factory: Option<Arc<dyn SkipEvaluatorFactory>>,
    workspace_root: Option<PathBuf>,
}

impl BuildService {
    pub fn new(generator: Arc<dyn SiteGenerator>) -> Self {
        Self {
            generator,
            skip_factory: None,
            workspace_root: None,
        }
    }

    pub fn with_skip_factory(mut self, factory: Arc<dyn SkipEvaluatorFactory>) -> Self {
        self.skip_factory = Some(factory);
        self
    }

    /// Root directory builds create their workspaces under; defaults to the
    /// system temp directory.
    pub fn with_workspace_root(mut self, root: PathBuf) -> Self {
        self.workspace_root = Some(root);
        self
    }

    pub async fn build(
        &self,
        cancel: &CancellationToken,
        request: &BuildRequest,
    ) -> Result<BuildResult> {
        let Some(config) = &request.config else {
            return Err(Error::Config("configuration is required".to_string()));
        };

        if config.repositories.is_empty() {
            info!("no repositories configured; nothing to build");
            return Ok(BuildResult {
                status: BuildStatus::Success,
                repositories: 0,
                files_processed: 0,
                repositories_skipped: 0,
                duration: Duration::ZERO,
                output_path: request.output_dir.clone(),
                report: None,
            });
        }

        if request.options.skip_if_unchanged {
            if let Some(factory) = &self.skip_factory {
                let evaluator = factory.create(&request.output_dir);
                if let Some(report) = evaluator.evaluate(config, &request.output_dir).await {
                    return Ok(Self::result_from_report(
                        BuildStatus::Skipped,
                        report,
                        &request.output_dir,
                    ));
                }
            }
        }

        let workspace = Workspace::create(self.workspace_root.as_deref())
            .await
            .map_err(|err| Error::filesystem("create workspace", err))?;

        let mut effective = (**config).clone();
        if request.incremental && effective.clone.strategy == CloneStrategy::Fresh {
            debug!("incremental build; upgrading clone strategy fresh -> update");
            effective.clone.strategy = CloneStrategy::Update;
        }

        let report = self
            .generator
            .generate(cancel, &effective, workspace.path(), &request.output_dir)
            .await?;

        Ok(Self::result_from_report(
            report.outcome.into(),
            report,
            &request.output_dir,
        ))
    }

    fn result_from_report(
        status: BuildStatus,
        report: BuildReport,
        output_dir: &Path,
    ) -> BuildResult {
        BuildResult {
            status,
            repositories: report.repositories,
            files_processed: report.files,
            repositories_skipped: report.skipped_repositories,
            duration: report.duration().to_std().unwrap_or_default(),
            output_path: output_dir.to_path_buf(),
            report: Some(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use docbuilder_core::repository::Repository;
    use docbuilder_core::stage::{Stage, StageError, StageOutcome, StageStatus};
    use docbuilder_core::issue::IssueCode;

    use crate::report::{ReportBuilder, ToolVersions, persist_report, sha256_hex};
    use crate::skip::{JsonStateStore, SkipState, SkipStateStore};
    use crate::{CONTENT_DIR, PUBLIC_DIR};

    /// Generator stub: records the workspace it saw, returns a canned
    /// outcome.
    struct StubGenerator {
        outcome: Outcome,
        seen_workspace: Mutex<Option<PathBuf>>,
        seen_strategy: Mutex<Option<CloneStrategy>>,
    }

    impl StubGenerator {
        fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                seen_workspace: Mutex::new(None),
                seen_strategy: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SiteGenerator for StubGenerator {
        async fn generate(
            &self,
            _cancel: &CancellationToken,
            config: &BuildConfig,
            workspace: &Path,
            _output_dir: &Path,
        ) -> Result<BuildReport> {
            *self.seen_workspace.lock().unwrap() = Some(workspace.to_path_buf());
            *self.seen_strategy.lock().unwrap() = Some(config.clone.strategy);
            assert!(workspace.is_dir(), "workspace must exist during generate");

            let mut builder = ReportBuilder::new(&ToolVersions {
                docbuilder: "test".into(),
                hugo: None,
            });
            builder.set_repositories(config.repositories.len());
            builder.set_files(3);
            if self.outcome == Outcome::Failed {
                let outcome = StageOutcome {
                    stage: Stage::RunHugo,
                    status: StageStatus::Fatal,
                    code: Some(IssueCode::HugoExecution),
                    message: None,
                    abort: true,
                };
                builder.record_stage(
                    Duration::from_millis(1),
                    &outcome,
                    Some(StageError::fatal(Stage::RunHugo, anyhow::anyhow!("boom"))),
                );
            }
            builder.finish();
            Ok(builder.into_report())
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

    fn request(config: Option<BuildConfig>, output: &Path) -> BuildRequest {
        BuildRequest {
            config: config.map(Arc::new),
            output_dir: output.to_path_buf(),
            incremental: false,
            options: BuildOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_missing_config_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let service = BuildService::new(Arc::new(StubGenerator::new(Outcome::Success)));
        let err = service
            .build(&CancellationToken::new(), &request(None, tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_repositories_succeed_without_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace_root = tempfile::tempdir().unwrap();
        let generator = Arc::new(StubGenerator::new(Outcome::Success));
        let service = BuildService::new(generator.clone())
            .with_workspace_root(workspace_root.path().to_path_buf());

        let result = service
            .build(
                &CancellationToken::new(),
                &request(Some(BuildConfig::default()), tmp.path()),
            )
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Success);
        assert_eq!(result.repositories, 0);
        assert_eq!(result.files_processed, 0);
        assert!(result.report.is_none());
        // The generator never ran and no workspace was created.
        assert!(generator.seen_workspace.lock().unwrap().is_none());
        assert_eq!(
            std::fs::read_dir(workspace_root.path()).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_workspace_is_cleaned_up_after_build() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace_root = tempfile::tempdir().unwrap();
        let generator = Arc::new(StubGenerator::new(Outcome::Success));
        let service = BuildService::new(generator.clone())
            .with_workspace_root(workspace_root.path().to_path_buf());

        let mut config = BuildConfig::default();
        config.repositories.push(repo("api"));
        let result = service
            .build(&CancellationToken::new(), &request(Some(config), tmp.path()))
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Success);
        assert_eq!(result.files_processed, 3);
        let seen = generator.seen_workspace.lock().unwrap().clone().unwrap();
        assert!(!seen.exists(), "workspace must be removed after the build");
    }

    #[tokio::test]
    async fn test_failed_outcome_maps_to_failed_status() {
        let tmp = tempfile::tempdir().unwrap();
        let service = BuildService::new(Arc::new(StubGenerator::new(Outcome::Failed)));
        let mut config = BuildConfig::default();
        config.repositories.push(repo("api"));
        let result = service
            .build(&CancellationToken::new(), &request(Some(config), tmp.path()))
            .await
            .unwrap();
        assert_eq!(result.status, BuildStatus::Failed);
        assert!(result.report.is_some());
    }

    #[tokio::test]
    async fn test_incremental_upgrades_fresh_to_update() {
        let tmp = tempfile::tempdir().unwrap();
        let generator = Arc::new(StubGenerator::new(Outcome::Success));
        let service = BuildService::new(generator.clone());
        let mut config = BuildConfig::default();
        config.repositories.push(repo("api"));
        config.clone.strategy = CloneStrategy::Fresh;

        let mut req = request(Some(config), tmp.path());
        req.incremental = true;
        service
            .build(&CancellationToken::new(), &req)
            .await
            .unwrap();
        assert_eq!(
            *generator.seen_strategy.lock().unwrap(),
            Some(CloneStrategy::Update)
        );
    }

    struct StubSkipFactory;

    impl SkipEvaluatorFactory for StubSkipFactory {
        fn create(&self, output_dir: &Path) -> SkipEvaluator {
            SkipEvaluator::new(
                Arc::new(JsonStateStore::for_output_dir(output_dir)),
                ToolVersions {
                    docbuilder: env!("CARGO_PKG_VERSION").to_string(),
                    hugo: None,
                },
            )
        }
    }

    /// Seed a previous build so the real evaluator skips.
    async fn seed_skippable_output(out: &Path, config: &BuildConfig) {
        std::fs::create_dir_all(out.join(PUBLIC_DIR)).unwrap();
        std::fs::write(out.join(PUBLIC_DIR).join("index.html"), "<html>").unwrap();
        std::fs::create_dir_all(out.join(CONTENT_DIR)).unwrap();
        std::fs::write(out.join(CONTENT_DIR).join("page.md"), "# page").unwrap();

        let mut previous = BuildReport::new();
        previous.repositories = 1;
        previous.files = 12;
        previous.rendered_pages = 13;
        previous.static_rendered = true;
        previous.doc_files_hash = Some("H".to_string());
        previous.docbuilder_version = Some(env!("CARGO_PKG_VERSION").to_string());
        previous.finish();
        let json = persist_report(&previous, out).await.unwrap();

        let store = JsonStateStore::for_output_dir(out);
        store
            .save(&SkipState {
                config_hash: config.hash(),
                repo_commits: [("api".to_string(), "abc".to_string())].into(),
                repo_doc_hashes: [("api".to_string(), "H".to_string())].into(),
                global_doc_hash: "H".to_string(),
                report_checksum: sha256_hex(json.as_bytes()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_skip_if_unchanged_returns_skipped_status() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::default();
        config.repositories.push(repo("api"));
        seed_skippable_output(tmp.path(), &config).await;

        let generator = Arc::new(StubGenerator::new(Outcome::Success));
        let service =
            BuildService::new(generator.clone()).with_skip_factory(Arc::new(StubSkipFactory));
        let mut req = request(Some(config), tmp.path());
        req.options.skip_if_unchanged = true;

        let result = service
            .build(&CancellationToken::new(), &req)
            .await
            .unwrap();
        assert_eq!(result.status, BuildStatus::Skipped);
        assert_eq!(result.repositories, 1);
        assert_eq!(result.files_processed, 12);
        // The generator never ran.
        assert!(generator.seen_workspace.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skip_disabled_runs_the_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::default();
        config.repositories.push(repo("api"));
        seed_skippable_output(tmp.path(), &config).await;

        let generator = Arc::new(StubGenerator::new(Outcome::Success));
        let service =
            BuildService::new(generator.clone()).with_skip_factory(Arc::new(StubSkipFactory));
        let req = request(Some(config), tmp.path());

        let result = service
            .build(&CancellationToken::new(), &req)
            .await
            .unwrap();
        assert_eq!(result.status, BuildStatus::Success);
        assert!(generator.seen_workspace.lock().unwrap().is_some());
    }
}
