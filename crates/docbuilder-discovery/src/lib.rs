//! Documentation discovery: walk checked-out trees and emit an ordered
//! doc-file list with a stable content hash.

use std::collections::BTreeMap;
use std::path::Path;

use async_recursion::async_recursion;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use docbuilder_core::docfile::DocFile;
use docbuilder_core::repository::Repository;
use docbuilder_core::state::GitState;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "vendor", "__pycache__"];

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid ignore pattern {pattern}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// The discovery output: an ordered file list plus derived hashes.
#[derive(Debug, Default)]
pub struct DiscoveredDocs {
    pub files: Vec<DocFile>,
    /// SHA-256 over the sorted site paths of every file, NUL-joined.
    pub hash: String,
    /// Same construction, restricted to each repository's files.
    pub per_repo_hashes: BTreeMap<String, String>,
    pub single_repo: bool,
}

/// Walks repository checkouts for documentation files.
#[derive(Debug)]
pub struct DocDiscovery {
    extensions: Vec<String>,
    ignore: Vec<Regex>,
}

impl DocDiscovery {
    pub fn new(
        extensions: Vec<String>,
        ignore_patterns: &[String],
    ) -> Result<Self, DiscoveryError> {
        let mut ignore = Vec::with_capacity(ignore_patterns.len());
        for pattern in ignore_patterns {
            let regex = Regex::new(pattern).map_err(|source| DiscoveryError::BadPattern {
                pattern: pattern.clone(),
                source,
            })?;
            ignore.push(regex);
        }
        Ok(Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore,
        })
    }

    /// Walk every cloned repository in declared order. Repositories without
    /// a checkout path (failed clones) are skipped.
    pub async fn discover(&self, git: &GitState) -> Result<DiscoveredDocs, DiscoveryError> {
        let mut files = Vec::new();
        let cloned: Vec<&Repository> = git
            .repositories
            .iter()
            .filter(|r| git.repo_paths.contains_key(&r.name))
            .collect();
        let single_repo = cloned.len() == 1;

        for repo in &cloned {
            let checkout = &git.repo_paths[&repo.name];
            for root in &repo.docs_dirs {
                let root_path = if root == "." {
                    checkout.clone()
                } else {
                    checkout.join(root)
                };
                if !tokio::fs::try_exists(&root_path).await.unwrap_or(false) {
                    debug!(repo = %repo.name, root = %root, "documentation root absent");
                    continue;
                }
                self.walk(repo, root, checkout, &root_path, &mut files)
                    .await?;
            }
        }

        let mut docs = DiscoveredDocs {
            files,
            hash: String::new(),
            per_repo_hashes: BTreeMap::new(),
            single_repo,
        };
        docs.hash = hash_paths(docs.files.iter().map(|f| f.site_path(single_repo)));
        for repo in &cloned {
            let paths = docs
                .files
                .iter()
                .filter(|f| f.repository == repo.name)
                .map(|f| f.site_path(single_repo));
            docs.per_repo_hashes
                .insert(repo.name.clone(), hash_paths(paths));
        }
        Ok(docs)
    }

    #[async_recursion]
    async fn walk(
        &self,
        repo: &Repository,
        root: &str,
        checkout: &Path,
        current: &Path,
        files: &mut Vec<DocFile>,
    ) -> Result<(), DiscoveryError> {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(current).await?;
        while let Some(entry) = reader.next_entry().await? {
            entries.push(entry.path());
        }
        // Deterministic output under a given tree.
        entries.sort();

        for path in entries {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if path.is_dir() {
                if file_name.starts_with('.') || SKIPPED_DIRS.contains(&file_name.as_str()) {
                    continue;
                }
                self.walk(repo, root, checkout, &path, files).await?;
                continue;
            }

            let Some(extension) = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
            else {
                continue;
            };
            if !self.extensions.contains(&extension) {
                continue;
            }

            // A README sitting directly at a discovery root is the root's
            // own front page, not documentation content.
            let is_readme = path
                .file_stem()
                .map(|s| s.to_string_lossy().eq_ignore_ascii_case("readme"))
                .unwrap_or(false);
            let root_dir = if root == "." {
                checkout.to_path_buf()
            } else {
                checkout.join(root)
            };
            if is_readme && path.parent() == Some(root_dir.as_path()) {
                debug!(repo = %repo.name, path = %path.display(), "skipping root readme");
                continue;
            }

            let rel_path = match path.strip_prefix(checkout) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if self.ignore.iter().any(|re| re.is_match(&rel_path)) {
                debug!(repo = %repo.name, path = %rel_path, "ignored by pattern");
                continue;
            }

            let mut metadata = BTreeMap::new();
            if let Some(edit_url) = repo.edit_url(&rel_path) {
                metadata.insert("edit_url".to_string(), edit_url);
            }

            files.push(DocFile {
                repository: repo.name.clone(),
                forge: repo.forge(),
                section: repo.section().to_string(),
                rel_path,
                root: root.to_string(),
                extension,
                metadata,
            });
        }
        Ok(())
    }
}

/// SHA-256 of the sorted paths joined by NUL bytes: a pure function of the
/// emitted path multiset, insensitive to repository permutation.
pub fn hash_paths(paths: impl Iterator<Item = String>) -> String {
    let mut sorted: Vec<String> = paths.collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for (i, path) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(path.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Best-effort probe used by skip validation: does `dir` contain any
/// markdown file, recursively?
pub fn contains_markdown(dir: &Path) -> bool {
    let Ok(reader) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in reader.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if contains_markdown(&path) {
                return true;
            }
        } else if path
            .extension()
            .map(|e| {
                let e = e.to_string_lossy().to_ascii_lowercase();
                e == "md" || e == "markdown"
            })
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn repo(name: &str, docs_dirs: &[&str]) -> Repository {
        Repository {
            name: name.into(),
            url: format!("https://github.com/acme/{name}.git"),
            branch: "main".into(),
            commit: None,
            docs_dirs: docs_dirs.iter().map(|s| s.to_string()).collect(),
            section: None,
        }
    }

    fn git_state(repos: Vec<(Repository, PathBuf)>) -> GitState {
        let mut state = GitState::default();
        for (repo, path) in repos {
            state.repo_paths.insert(repo.name.clone(), path);
            state.repositories.push(repo);
        }
        state
    }

    #[tokio::test]
    async fn test_discovers_markdown_under_docs_root() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "docs/intro.md", "# intro");
        write(tmp.path(), "docs/guide/setup.md", "# setup");
        write(tmp.path(), "docs/guide/diagram.png", "");
        write(tmp.path(), "src/main.rs", "fn main() {}");

        let state = git_state(vec![(repo("api", &["docs"]), tmp.path().to_path_buf())]);
        let discovery = DocDiscovery::new(vec!["md".into(), "markdown".into()], &[]).unwrap();
        let docs = discovery.discover(&state).await.unwrap();

        let rels: Vec<&str> = docs.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["docs/guide/setup.md", "docs/intro.md"]);
        assert!(docs.single_repo);
        assert!(!docs.hash.is_empty());
    }

    #[tokio::test]
    async fn test_root_readme_is_excluded_but_nested_readme_kept() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "docs/README.md", "# front page");
        write(tmp.path(), "docs/guide/README.md", "# guide index");

        let state = git_state(vec![(repo("api", &["docs"]), tmp.path().to_path_buf())]);
        let discovery = DocDiscovery::new(vec!["md".into()], &[]).unwrap();
        let docs = discovery.discover(&state).await.unwrap();

        let rels: Vec<&str> = docs.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["docs/guide/README.md"]);
    }

    #[tokio::test]
    async fn test_ignore_patterns_and_vendor_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "docs/keep.md", "keep");
        write(tmp.path(), "docs/drafts/wip.md", "wip");
        write(tmp.path(), "docs/node_modules/dep/readme-ish.md", "dep");
        write(tmp.path(), "docs/.hidden/secret.md", "secret");

        let state = git_state(vec![(repo("api", &["docs"]), tmp.path().to_path_buf())]);
        let discovery =
            DocDiscovery::new(vec!["md".into()], &["drafts/".to_string()]).unwrap();
        let docs = discovery.discover(&state).await.unwrap();

        let rels: Vec<&str> = docs.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["docs/keep.md"]);
    }

    #[tokio::test]
    async fn test_bad_ignore_pattern_is_rejected() {
        let err = DocDiscovery::new(vec!["md".into()], &["([".to_string()]).unwrap_err();
        assert!(matches!(err, DiscoveryError::BadPattern { .. }));
    }

    #[tokio::test]
    async fn test_hash_is_permutation_invariant() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        write(tmp_a.path(), "docs/a.md", "a");
        write(tmp_b.path(), "docs/b.md", "b");

        let discovery = DocDiscovery::new(vec!["md".into()], &[]).unwrap();

        let forward = git_state(vec![
            (repo("alpha", &["docs"]), tmp_a.path().to_path_buf()),
            (repo("beta", &["docs"]), tmp_b.path().to_path_buf()),
        ]);
        let reversed = git_state(vec![
            (repo("beta", &["docs"]), tmp_b.path().to_path_buf()),
            (repo("alpha", &["docs"]), tmp_a.path().to_path_buf()),
        ]);

        let first = discovery.discover(&forward).await.unwrap();
        let second = discovery.discover(&reversed).await.unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.per_repo_hashes, second.per_repo_hashes);
    }

    #[tokio::test]
    async fn test_per_repo_hash_tracks_only_that_repository() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        write(tmp_a.path(), "docs/a.md", "a");
        write(tmp_b.path(), "docs/b.md", "b");

        let discovery = DocDiscovery::new(vec!["md".into()], &[]).unwrap();
        let state = git_state(vec![
            (repo("alpha", &["docs"]), tmp_a.path().to_path_buf()),
            (repo("beta", &["docs"]), tmp_b.path().to_path_buf()),
        ]);
        let docs = discovery.discover(&state).await.unwrap();

        write(tmp_b.path(), "docs/more.md", "more");
        let docs_after = discovery.discover(&state).await.unwrap();

        assert_eq!(
            docs.per_repo_hashes.get("alpha"),
            docs_after.per_repo_hashes.get("alpha")
        );
        assert_ne!(
            docs.per_repo_hashes.get("beta"),
            docs_after.per_repo_hashes.get("beta")
        );
        assert_ne!(docs.hash, docs_after.hash);
    }

    #[tokio::test]
    async fn test_repositories_without_checkout_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "docs/a.md", "a");

        let mut state = git_state(vec![(repo("alpha", &["docs"]), tmp.path().to_path_buf())]);
        state.repositories.push(repo("missing", &["docs"]));

        let discovery = DocDiscovery::new(vec!["md".into()], &[]).unwrap();
        let docs = discovery.discover(&state).await.unwrap();
        assert_eq!(docs.files.len(), 1);
        // One cloned repository means a single-repo doc set.
        assert!(docs.single_repo);
    }

    #[test]
    fn test_contains_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!contains_markdown(tmp.path()));
        write(tmp.path(), "sub/deep/page.md", "x");
        assert!(contains_markdown(tmp.path()));
    }
}
