//! Documentation files discovered in checked-out repositories.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::repository::Forge;

/// A single documentation file, produced by discovery and consumed by the
/// transforming stages and the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocFile {
    pub repository: String,
    pub forge: Forge,
    pub section: String,
    /// Path inside the repository checkout, `/`-separated.
    pub rel_path: String,
    /// The documentation root `rel_path` was found under (`.` for the
    /// repository root).
    pub root: String,
    pub extension: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DocFile {
    /// Path of `rel_path` relative to its documentation root.
    pub fn doc_path(&self) -> &str {
        if self.root == "." {
            return &self.rel_path;
        }
        self.rel_path
            .strip_prefix(self.root.as_str())
            .map(|p| p.trim_start_matches('/'))
            .unwrap_or(&self.rel_path)
    }

    /// Where this file lands in the staged content tree.
    ///
    /// Multi-repo builds nest files under the repository name; single-repo
    /// builds flatten it away.
    pub fn site_path(&self, single_repo: bool) -> String {
        if single_repo {
            format!("{}/{}", self.section, self.doc_path())
        } else {
            format!("{}/{}/{}", self.section, self.repository, self.doc_path())
        }
    }
}
