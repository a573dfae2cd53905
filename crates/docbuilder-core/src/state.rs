//! Per-build mutable state shared across pipeline stages.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::docfile::DocFile;
use crate::repository::Repository;

/// Git-side state: what was cloned where, and which heads moved.
#[derive(Debug, Clone, Default)]
pub struct GitState {
    pub repositories: Vec<Repository>,
    pub workspace: PathBuf,
    pub repo_paths: BTreeMap<String, PathBuf>,
    pub pre_heads: BTreeMap<String, String>,
    pub post_heads: BTreeMap<String, String>,
    pub commit_dates: BTreeMap<String, DateTime<Utc>>,
}

impl GitState {
    /// True iff every pre-head equals its post-head and the set is
    /// non-empty.
    pub fn all_repos_unchanged(&self) -> bool {
        !self.pre_heads.is_empty()
            && self
                .pre_heads
                .iter()
                .all(|(name, pre)| self.post_heads.get(name) == Some(pre))
    }
}

/// Discovered documentation files plus derived indexes.
#[derive(Debug, Clone, Default)]
pub struct DocsState {
    pub files: Vec<DocFile>,
    /// Indexes into `files`, keyed by repository name.
    pub by_repository: BTreeMap<String, Vec<usize>>,
    /// Indexes into `files`, keyed by section.
    pub by_section: BTreeMap<String, Vec<usize>>,
    pub single_repo: bool,
    /// Stable hash of the whole doc set.
    pub doc_files_hash: String,
    /// Same construction per repository, used to refresh the skip state.
    pub per_repo_hashes: BTreeMap<String, String>,
}

impl DocsState {
    pub fn set_files(&mut self, files: Vec<DocFile>, single_repo: bool) {
        self.by_repository.clear();
        self.by_section.clear();
        for (idx, file) in files.iter().enumerate() {
            self.by_repository
                .entry(file.repository.clone())
                .or_default()
                .push(idx);
            self.by_section
                .entry(file.section.clone())
                .or_default()
                .push(idx);
        }
        self.files = files;
        self.single_repo = single_repo;
    }

    pub fn files_for_repository(&self, name: &str) -> impl Iterator<Item = &DocFile> {
        self.by_repository
            .get(name)
            .into_iter()
            .flatten()
            .map(|&idx| &self.files[idx])
    }

    pub fn files_for_section(&self, section: &str) -> impl Iterator<Item = &DocFile> {
        self.by_section
            .get(section)
            .into_iter()
            .flatten()
            .map(|&idx| &self.files[idx])
    }
}

/// Pipeline-wide scalars fixed at build start.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub config_hash: String,
    pub start_time: DateTime<Utc>,
}

/// The per-build scratchpad stages mutate.
#[derive(Debug, Clone)]
pub struct BuildState {
    pub git: GitState,
    pub docs: DocsState,
    pub pipeline: PipelineState,
}

impl BuildState {
    pub fn new(repositories: Vec<Repository>, workspace: PathBuf, config_hash: String) -> Self {
        Self {
            git: GitState {
                repositories,
                workspace,
                ..GitState::default()
            },
            docs: DocsState::default(),
            pipeline: PipelineState {
                config_hash,
                start_time: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Forge;
    use std::collections::BTreeMap as Map;

    #[test]
    fn test_all_repos_unchanged_requires_non_empty_set() {
        let state = GitState::default();
        assert!(!state.all_repos_unchanged());
    }

    #[test]
    fn test_all_repos_unchanged() {
        let mut state = GitState::default();
        state.pre_heads.insert("a".into(), "abc".into());
        state.post_heads.insert("a".into(), "abc".into());
        assert!(state.all_repos_unchanged());

        state.pre_heads.insert("b".into(), "one".into());
        state.post_heads.insert("b".into(), "two".into());
        assert!(!state.all_repos_unchanged());
    }

    #[test]
    fn test_missing_post_head_counts_as_changed() {
        let mut state = GitState::default();
        state.pre_heads.insert("a".into(), "abc".into());
        assert!(!state.all_repos_unchanged());
    }

    #[test]
    fn test_docs_state_indexes() {
        let mk = |repo: &str, section: &str, path: &str| DocFile {
            repository: repo.into(),
            forge: Forge::Github,
            section: section.into(),
            rel_path: path.into(),
            root: ".".into(),
            extension: "md".into(),
            metadata: Map::new(),
        };
        let mut docs = DocsState::default();
        docs.set_files(
            vec![
                mk("api", "services", "a.md"),
                mk("api", "services", "b.md"),
                mk("infra", "platform", "c.md"),
            ],
            false,
        );
        assert_eq!(docs.files_for_repository("api").count(), 2);
        assert_eq!(docs.files_for_section("platform").count(), 1);
        assert_eq!(docs.files_for_repository("unknown").count(), 0);
    }
}
