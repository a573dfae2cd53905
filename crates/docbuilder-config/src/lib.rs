//! Typed configuration for the docbuilder documentation aggregator.
//!
//! The build core consumes these structs; parsing them out of YAML happens
//! at the binary boundary via [`BuildConfig::from_yaml_file`].

pub mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use docbuilder_core::job::BackoffKind;
use docbuilder_core::repository::{CloneStrategy, Repository};

pub use error::{ConfigError, ConfigResult};

/// Top-level build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Site title handed to the renderer.
    #[serde(default = "default_title")]
    pub title: String,
    /// Base URL of the published site.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub clone: CloneSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub hugo: HugoSettings,
    /// Evaluate the skip rule chain before building.
    #[serde(default)]
    pub skip_if_unchanged: bool,
}

fn default_title() -> String {
    "Documentation".to_string()
}

fn default_base_url() -> String {
    "/".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            base_url: default_base_url(),
            repositories: Vec::new(),
            clone: CloneSettings::default(),
            retry: RetrySettings::default(),
            queue: QueueSettings::default(),
            discovery: DiscoverySettings::default(),
            hugo: HugoSettings::default(),
            skip_if_unchanged: false,
        }
    }
}

/// How repositories are fetched into the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneSettings {
    #[serde(default)]
    pub strategy: CloneStrategy,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl Default for CloneSettings {
    fn default() -> Self {
        Self {
            strategy: CloneStrategy::default(),
            concurrency: default_concurrency(),
        }
    }
}

/// Retry policy applied to transient stage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffKind::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Build queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_size")]
    pub max_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_history")]
    pub history: usize,
}

fn default_queue_size() -> usize {
    100
}

fn default_workers() -> usize {
    2
}

fn default_history() -> usize {
    50
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: default_queue_size(),
            workers: default_workers(),
            history: default_history(),
        }
    }
}

/// What discovery treats as documentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Extensions admitted to the doc set, without the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Regex patterns matched against repository-relative paths.
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string()]
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore: Vec::new(),
        }
    }
}

/// External renderer invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HugoSettings {
    #[serde(default = "default_hugo_binary")]
    pub binary: String,
    /// Layout overrides staged into the workspace, when present.
    #[serde(default)]
    pub layouts_dir: Option<PathBuf>,
}

fn default_hugo_binary() -> String {
    "hugo".to_string()
}

impl Default for HugoSettings {
    fn default() -> Self {
        Self {
            binary: default_hugo_binary(),
            layouts_dir: None,
        }
    }
}

impl BuildConfig {
    pub fn from_yaml_str(input: &str) -> ConfigResult<Self> {
        let config: BuildConfig = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> ConfigResult<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&input)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for repo in &self.repositories {
            if repo.name.is_empty() {
                return Err(ConfigError::MissingField("repository.name".to_string()));
            }
            if repo.url.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "repository.{}.url",
                    repo.name
                )));
            }
            if !seen.insert(repo.name.clone()) {
                return Err(ConfigError::Duplicate(repo.name.clone()));
            }
        }
        if self.clone.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "clone.concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Content-addressed identity of this configuration: SHA-256 over its
    /// canonical JSON form. Stable across load/save cycles because struct
    /// fields serialize in declaration order.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}
