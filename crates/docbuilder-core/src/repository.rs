//! Source repository declarations.

use serde::{Deserialize, Serialize};

/// The upstream hosting system a repository lives on, derived from its
/// clone URL. Used downstream to build edit links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Forge {
    Github,
    Gitlab,
    Bitbucket,
    Gitea,
    Other,
}

impl Forge {
    /// Best-effort detection from a clone URL's host.
    pub fn from_url(url: &str) -> Forge {
        // scp-style remotes (git@host:owner/repo) do not parse as URLs;
        // fall back to matching the raw string.
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| url.to_ascii_lowercase());
        if host.contains("github") {
            Forge::Github
        } else if host.contains("gitlab") {
            Forge::Gitlab
        } else if host.contains("bitbucket") {
            Forge::Bitbucket
        } else if host.contains("gitea") || host.contains("codeberg") {
            Forge::Gitea
        } else {
            Forge::Other
        }
    }
}

impl std::fmt::Display for Forge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Forge::Github => write!(f, "github"),
            Forge::Gitlab => write!(f, "gitlab"),
            Forge::Bitbucket => write!(f, "bitbucket"),
            Forge::Gitea => write!(f, "gitea"),
            Forge::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for Forge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(Forge::Github),
            "gitlab" => Ok(Forge::Gitlab),
            "bitbucket" => Ok(Forge::Bitbucket),
            "gitea" | "codeberg" => Ok(Forge::Gitea),
            "other" => Ok(Forge::Other),
            _ => Err(format!("Unknown forge: {}", s)),
        }
    }
}

/// How repositories are brought into the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneStrategy {
    /// Always clone into a fresh path.
    Fresh,
    /// Clone if missing, otherwise fast-forward to the remote tip.
    Update,
    /// Update when a checkout with a git directory exists, clone otherwise.
    #[default]
    Auto,
}

impl std::fmt::Display for CloneStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloneStrategy::Fresh => write!(f, "fresh"),
            CloneStrategy::Update => write!(f, "update"),
            CloneStrategy::Auto => write!(f, "auto"),
        }
    }
}

/// A source repository to aggregate documentation from.
///
/// Declared by the caller and never mutated by the build core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// When set, the working tree is checked out detached at this commit.
    #[serde(default)]
    pub commit: Option<String>,
    /// Documentation roots inside the checkout, walked in order.
    #[serde(default = "default_docs_dirs")]
    pub docs_dirs: Vec<String>,
    /// Site section this repository's docs land under.
    #[serde(default)]
    pub section: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_docs_dirs() -> Vec<String> {
    vec!["docs".to_string()]
}

impl Repository {
    pub fn forge(&self) -> Forge {
        Forge::from_url(&self.url)
    }

    pub fn section(&self) -> &str {
        self.section.as_deref().unwrap_or("docs")
    }

    /// Edit link prefix for a file at `rel_path` on this repository's forge.
    pub fn edit_url(&self, rel_path: &str) -> Option<String> {
        let base = self.url.trim_end_matches(".git").trim_end_matches('/');
        match self.forge() {
            Forge::Github | Forge::Gitea => {
                Some(format!("{}/edit/{}/{}", base, self.branch, rel_path))
            }
            Forge::Gitlab => Some(format!("{}/-/edit/{}/{}", base, self.branch, rel_path)),
            Forge::Bitbucket => Some(format!("{}/src/{}/{}", base, self.branch, rel_path)),
            Forge::Other => None,
        }
    }
}
