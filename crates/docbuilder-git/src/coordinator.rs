//! Fan-out of repository fetches to a bounded worker pool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docbuilder_core::issue::{Issue, IssueCode, Severity};
use docbuilder_core::repository::{CloneStrategy, Repository};
use docbuilder_core::stage::Stage;

use crate::classify::classify;
use crate::fetcher::{FetchError, Fetcher};

/// Aggregated result of one clone fan-out.
#[derive(Debug, Default)]
pub struct CloneOutcome {
    pub repo_paths: BTreeMap<String, PathBuf>,
    pub pre_heads: BTreeMap<String, String>,
    pub post_heads: BTreeMap<String, String>,
    pub commit_dates: BTreeMap<String, DateTime<Utc>>,
    pub cloned: usize,
    pub failed: usize,
    /// Fetches that found the checkout already at the remote tip.
    pub unchanged: usize,
    pub issues: Vec<Issue>,
    pub canceled: bool,
}

/// Fans repositories out to at most `concurrency` workers and merges the
/// results under a single lock.
pub struct CloneCoordinator {
    fetcher: Arc<dyn Fetcher>,
    strategy: CloneStrategy,
    concurrency: usize,
}

impl CloneCoordinator {
    pub fn new(fetcher: Arc<dyn Fetcher>, strategy: CloneStrategy, concurrency: usize) -> Self {
        Self {
            fetcher,
            strategy,
            concurrency,
        }
    }

    pub async fn run(
        &self,
        cancel: &CancellationToken,
        repositories: &[Repository],
        workspace: &Path,
    ) -> CloneOutcome {
        if repositories.is_empty() {
            return CloneOutcome::default();
        }

        let worker_count = self.concurrency.max(1).min(repositories.len());
        let (tx, rx) = mpsc::unbounded_channel::<Repository>();
        for repo in repositories {
            // The receiver outlives this loop; send cannot fail here.
            let _ = tx.send(repo.clone());
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let outcome = Arc::new(Mutex::new(CloneOutcome::default()));
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let fetcher = self.fetcher.clone();
            let strategy = self.strategy;
            let rx = rx.clone();
            let outcome = outcome.clone();
            let cancel = cancel.clone();
            let workspace = workspace.to_path_buf();
            workers.spawn(async move {
                worker_loop(worker_id, fetcher, strategy, rx, outcome, cancel, workspace).await;
            });
        }
        while workers.join_next().await.is_some() {}

        let mut merged = {
            let mut guard = outcome.lock().await;
            std::mem::take(&mut *guard)
        };
        merged.canceled |= cancel.is_cancelled();
        merged
    }
}

async fn worker_loop(
    worker_id: usize,
    fetcher: Arc<dyn Fetcher>,
    strategy: CloneStrategy,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Repository>>>,
    outcome: Arc<Mutex<CloneOutcome>>,
    cancel: CancellationToken,
    workspace: PathBuf,
) {
    loop {
        let repo = { rx.lock().await.recv().await };
        let Some(repo) = repo else { break };

        if cancel.is_cancelled() {
            outcome.lock().await.canceled = true;
            break;
        }

        debug!(worker = worker_id, repo = %repo.name, "fetching repository");
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Canceled),
            res = fetcher.fetch(&cancel, strategy, &repo, &workspace) => res,
        };

        let mut merged = outcome.lock().await;
        match result {
            Ok(res) => {
                info!(
                    worker = worker_id,
                    repo = %repo.name,
                    updated = res.updated,
                    "repository ready"
                );
                merged.repo_paths.insert(repo.name.clone(), res.path);
                if let Some(pre) = res.pre_head {
                    merged.pre_heads.insert(repo.name.clone(), pre);
                }
                if let Some(post) = res.post_head {
                    merged.post_heads.insert(repo.name.clone(), post);
                }
                if let Some(date) = res.commit_date {
                    merged.commit_dates.insert(repo.name.clone(), date);
                }
                merged.cloned += 1;
                if !res.updated {
                    merged.unchanged += 1;
                }
            }
            Err(FetchError::Canceled) => {
                merged.canceled = true;
                break;
            }
            Err(err) => {
                let code = classify(&err).unwrap_or(IssueCode::CloneFailure);
                warn!(
                    worker = worker_id,
                    repo = %repo.name,
                    code = %code,
                    error = %err,
                    "repository fetch failed"
                );
                merged.failed += 1;
                merged.issues.push(Issue::new(
                    code,
                    Stage::CloneRepos,
                    Severity::Error,
                    format!("{}: {}", repo.name, err),
                ));
            }
        }
    }
}
