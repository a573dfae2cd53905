//! The stage commands executed by the runner, in pipeline order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_recursion::async_recursion;
use async_trait::async_trait;
use chrono::Utc;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docbuilder_config::BuildConfig;
use docbuilder_core::docfile::DocFile;
use docbuilder_core::issue::IssueCode;
use docbuilder_core::stage::{ClassifiedError, Stage, StageError};
use docbuilder_core::state::BuildState;
use docbuilder_discovery::DocDiscovery;
use docbuilder_git::{CloneCoordinator, Fetcher};

use crate::renderer::Renderer;
use crate::report::ReportBuilder;
use crate::{CONTENT_DIR, PUBLIC_DIR};

/// Per-build inputs shared by every stage.
pub struct StageContext {
    pub config: Arc<BuildConfig>,
    pub workspace: PathBuf,
    pub output_dir: PathBuf,
    pub cancel: CancellationToken,
}

/// One named, sequential step of the pipeline.
///
/// Errors bubble as `anyhow::Error`; the runner downcasts stage errors and
/// wraps anything else as fatal.
#[async_trait]
pub trait StageCommand: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(
        &self,
        cx: &StageContext,
        state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> anyhow::Result<()>;
}

/// Explicit, ordered stage registry. Constructed per build; no process-wide
/// state.
pub struct StageRegistry {
    commands: Vec<Box<dyn StageCommand>>,
}

impl StageRegistry {
    pub fn new(commands: Vec<Box<dyn StageCommand>>) -> Self {
        Self { commands }
    }

    /// The standard nine-stage pipeline.
    pub fn standard(fetcher: Arc<dyn Fetcher>, renderer: Arc<dyn Renderer>) -> Self {
        Self::new(vec![
            Box::new(PrepareOutputStage),
            Box::new(CloneStage { fetcher }),
            Box::new(DiscoverStage),
            Box::new(GenerateConfigStage),
            Box::new(LayoutsStage),
            Box::new(CopyContentStage),
            Box::new(IndexesStage),
            Box::new(RunHugoStage { renderer }),
            Box::new(PostProcessStage),
        ])
    }

    pub fn commands(&self) -> &[Box<dyn StageCommand>] {
        &self.commands
    }
}

/// Create the output root and a clean content tree.
pub struct PrepareOutputStage;

#[async_trait]
impl StageCommand for PrepareOutputStage {
    fn stage(&self) -> Stage {
        Stage::PrepareOutput
    }

    async fn run(
        &self,
        cx: &StageContext,
        _state: &mut BuildState,
        _report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&cx.output_dir).await?;
        let content = cx.output_dir.join(CONTENT_DIR);
        if tokio::fs::try_exists(&content).await? {
            tokio::fs::remove_dir_all(&content).await?;
        }
        tokio::fs::create_dir_all(&content).await?;
        Ok(())
    }
}

/// Fan repository fetches out to the coordinator and fold the outcome into
/// the build state.
pub struct CloneStage {
    pub fetcher: Arc<dyn Fetcher>,
}

#[async_trait]
impl StageCommand for CloneStage {
    fn stage(&self) -> Stage {
        Stage::CloneRepos
    }

    async fn run(
        &self,
        cx: &StageContext,
        state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let coordinator = CloneCoordinator::new(
            self.fetcher.clone(),
            cx.config.clone.strategy,
            cx.config.clone.concurrency,
        );
        let outcome = coordinator
            .run(&cx.cancel, &state.git.repositories, &state.git.workspace)
            .await;

        state.git.repo_paths = outcome.repo_paths;
        state.git.pre_heads = outcome.pre_heads;
        state.git.post_heads = outcome.post_heads;
        state.git.commit_dates = outcome.commit_dates;
        report.set_clone_counts(outcome.cloned, outcome.failed);
        report.add_skipped_repositories(outcome.unchanged);
        // Carry a transient classification into the stage error when one
        // exists, so the retry controller can see it.
        let failure_code = outcome
            .issues
            .iter()
            .find(|issue| issue.transient)
            .or_else(|| outcome.issues.first())
            .map(|issue| issue.code);
        for issue in outcome.issues {
            report.add_issue(issue);
        }

        if outcome.canceled {
            return Err(StageError::canceled(Stage::CloneRepos).into());
        }

        if state.git.all_repos_unchanged() {
            info!("no repository head changes detected");
        }

        let total = state.git.repositories.len();
        if outcome.cloned == 0 && outcome.failed > 0 {
            return Err(StageError::warning(
                Stage::CloneRepos,
                ClassifiedError {
                    code: failure_code.unwrap_or(IssueCode::AllClonesFailed),
                    message: format!("all {} repository clones failed", outcome.failed),
                },
            )
            .into());
        }
        if outcome.failed > 0 {
            return Err(StageError::warning(
                Stage::CloneRepos,
                ClassifiedError {
                    code: failure_code.unwrap_or(IssueCode::PartialClone),
                    message: format!(
                        "{} of {} repositories failed to clone",
                        outcome.failed, total
                    ),
                },
            )
            .into());
        }
        Ok(())
    }
}

/// Walk the checkouts for documentation files.
pub struct DiscoverStage;

#[async_trait]
impl StageCommand for DiscoverStage {
    fn stage(&self) -> Stage {
        Stage::DiscoverDocs
    }

    async fn run(
        &self,
        cx: &StageContext,
        state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        if state.git.repo_paths.is_empty() {
            return Err(StageError::warning(
                Stage::DiscoverDocs,
                anyhow::anyhow!("no repositories to discover documentation in"),
            )
            .into());
        }

        let discovery = DocDiscovery::new(
            cx.config.discovery.extensions.clone(),
            &cx.config.discovery.ignore,
        )
        .map_err(|err| StageError::fatal(Stage::DiscoverDocs, err))?;

        let docs = discovery
            .discover(&state.git)
            .await
            .map_err(|err| StageError::fatal(Stage::DiscoverDocs, err))?;

        info!(
            files = docs.files.len(),
            single_repo = docs.single_repo,
            "documentation discovered"
        );
        report.set_files(docs.files.len());
        report.set_doc_files_hash(docs.hash.clone());
        state.docs.doc_files_hash = docs.hash;
        state.docs.per_repo_hashes = docs.per_repo_hashes;
        let single_repo = docs.single_repo;
        state.docs.set_files(docs.files, single_repo);
        Ok(())
    }
}

/// Write the renderer's site configuration into the workspace.
pub struct GenerateConfigStage;

#[async_trait]
impl StageCommand for GenerateConfigStage {
    fn stage(&self) -> Stage {
        Stage::GenerateConfig
    }

    async fn run(
        &self,
        cx: &StageContext,
        _state: &mut BuildState,
        _report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let site = serde_json::json!({
            "baseURL": cx.config.base_url,
            "title": cx.config.title,
            "contentDir": cx.output_dir.join(CONTENT_DIR).to_string_lossy(),
            "publishDir": cx.output_dir.join(PUBLIC_DIR).to_string_lossy(),
            "disableKinds": ["taxonomy", "term"],
        });
        let rendered = serde_json::to_string_pretty(&site)?;
        tokio::fs::write(cx.workspace.join("hugo.json"), rendered).await?;
        Ok(())
    }
}

/// Stage caller-provided layout overrides into the workspace.
pub struct LayoutsStage;

#[async_trait]
impl StageCommand for LayoutsStage {
    fn stage(&self) -> Stage {
        Stage::Layouts
    }

    async fn run(
        &self,
        cx: &StageContext,
        _state: &mut BuildState,
        _report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let Some(source) = &cx.config.hugo.layouts_dir else {
            debug!("no layout overrides configured");
            return Ok(());
        };
        if !tokio::fs::try_exists(source).await? {
            return Err(StageError::fatal(
                Stage::Layouts,
                anyhow::anyhow!("layouts directory {} does not exist", source.display()),
            )
            .into());
        }
        copy_dir(source, &cx.workspace.join("layouts")).await?;
        Ok(())
    }
}

/// Transform every doc file's front matter and write it into the staged
/// content tree.
pub struct CopyContentStage;

#[async_trait]
impl StageCommand for CopyContentStage {
    fn stage(&self) -> Stage {
        Stage::CopyContent
    }

    async fn run(
        &self,
        cx: &StageContext,
        state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let content_root = cx.output_dir.join(CONTENT_DIR);
        let now = Utc::now();
        let mut processed = 0usize;

        for file in &state.docs.files {
            if cx.cancel.is_cancelled() {
                return Err(StageError::canceled(Stage::CopyContent).into());
            }
            let Some(checkout) = state.git.repo_paths.get(&file.repository) else {
                continue;
            };
            let source = checkout.join(&file.rel_path);
            let original = tokio::fs::read_to_string(&source).await.map_err(|err| {
                StageError::fatal(
                    Stage::CopyContent,
                    anyhow::Error::from(err).context(format!("reading {}", source.display())),
                )
            })?;

            let transformed = transform_document(file, &original, now);
            let dest = content_root.join(file.site_path(state.docs.single_repo));
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, transformed).await?;
            processed += 1;
        }

        info!(files = processed, "content staged");
        report.set_files(processed);
        Ok(())
    }
}

/// Synthesize section and repository index pages.
pub struct IndexesStage;

#[async_trait]
impl StageCommand for IndexesStage {
    fn stage(&self) -> Stage {
        Stage::Indexes
    }

    async fn run(
        &self,
        cx: &StageContext,
        state: &mut BuildState,
        _report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let content_root = cx.output_dir.join(CONTENT_DIR);

        for section in state.docs.by_section.keys() {
            write_index(&content_root.join(section), &prettify(section)).await?;
        }
        if !state.docs.single_repo {
            for file in &state.docs.files {
                let dir = content_root.join(&file.section).join(&file.repository);
                write_index(&dir, &prettify(&file.repository)).await?;
            }
        }
        Ok(())
    }
}

/// Invoke the external renderer.
pub struct RunHugoStage {
    pub renderer: Arc<dyn Renderer>,
}

#[async_trait]
impl StageCommand for RunHugoStage {
    fn stage(&self) -> Stage {
        Stage::RunHugo
    }

    async fn run(
        &self,
        cx: &StageContext,
        _state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let destination = cx.output_dir.join(PUBLIC_DIR);
        let result = tokio::select! {
            _ = cx.cancel.cancelled() => {
                return Err(StageError::canceled(Stage::RunHugo).into());
            }
            res = self.renderer.render(&cx.cancel, &cx.workspace, &destination) => res,
        };
        match result {
            Ok(summary) => {
                report.set_rendered_pages(summary.pages);
                report.set_static_rendered(true);
                Ok(())
            }
            Err(render_err) => Err(StageError::fatal(Stage::RunHugo, render_err).into()),
        }
    }
}

/// Verify the rendered site and fill count fallbacks.
pub struct PostProcessStage;

#[async_trait]
impl StageCommand for PostProcessStage {
    fn stage(&self) -> Stage {
        Stage::PostProcess
    }

    async fn run(
        &self,
        cx: &StageContext,
        _state: &mut BuildState,
        report: &mut ReportBuilder,
    ) -> anyhow::Result<()> {
        let public = cx.output_dir.join(PUBLIC_DIR);
        let rendered = count_files(&public).await;
        if rendered == 0 {
            report.set_static_rendered(false);
            return Err(StageError::warning(
                Stage::PostProcess,
                anyhow::anyhow!("renderer produced no output under {}", public.display()),
            )
            .into());
        }
        if report.report().rendered_pages == 0 {
            report.set_rendered_pages(rendered);
        }
        report.set_static_rendered(true);
        Ok(())
    }
}

/// Apply the front matter upserts to one document. Unparsable front matter
/// is copied through untouched.
fn transform_document(file: &DocFile, content: &str, now: chrono::DateTime<Utc>) -> String {
    let (fields, body) = match docbuilder_frontmatter::split_document(content) {
        Ok(parts) => parts,
        Err(err) => {
            warn!(
                repo = %file.repository,
                path = %file.rel_path,
                error = %err,
                "front matter unparsable; copying as-is"
            );
            return content.to_string();
        }
    };
    let mut fields = fields.unwrap_or_default();

    let title_key = Value::String("title".to_string());
    if !fields.contains_key(&title_key) {
        let stem = Path::new(&file.rel_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.rel_path.clone());
        fields.insert(title_key, Value::String(prettify(&stem)));
    }
    if let Some(edit_url) = file.metadata.get("edit_url") {
        fields.insert(
            Value::String("editURL".to_string()),
            Value::String(edit_url.clone()),
        );
    }

    let (uid, _) = docbuilder_frontmatter::ensure_uid(&mut fields);
    docbuilder_frontmatter::ensure_uid_alias(&mut fields, &uid);
    if let Err(err) = docbuilder_frontmatter::upsert_fingerprint(&mut fields, body, now) {
        warn!(
            repo = %file.repository,
            path = %file.rel_path,
            error = %err,
            "fingerprint upsert failed; copying as-is"
        );
        return content.to_string();
    }

    docbuilder_frontmatter::join_document(&fields, body).unwrap_or_else(|_| content.to_string())
}

/// "getting-started" -> "Getting Started".
fn prettify(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write `_index.md` into `dir` unless one is already staged there.
async fn write_index(dir: &Path, title: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let index = dir.join("_index.md");
    if tokio::fs::try_exists(&index).await? {
        return Ok(());
    }
    tokio::fs::write(&index, format!("---\ntitle: {title}\n---\n")).await
}

#[async_recursion]
async fn copy_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dest).await?;
    let mut entries = tokio::fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to).await?;
        } else {
            tokio::fs::copy(&from, &to).await?;
        }
    }
    Ok(())
}

/// Count regular files under `dir`, recursively. Missing directories count
/// as empty.
pub async fn count_files(dir: &Path) -> usize {
    fn walk(dir: &Path) -> usize {
        let Ok(reader) = std::fs::read_dir(dir) else {
            return 0;
        };
        reader
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() { walk(&path) } else { 1 }
            })
            .sum()
    }
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&dir))
        .await
        .unwrap_or(0)
}
