//! The external static-site renderer seam.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use docbuilder_core::stage::RenderError;

/// What the renderer reported about its run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub pages: usize,
    pub static_files: usize,
}

/// Runs the site renderer over a prepared workspace.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
    ) -> Result<RenderSummary, RenderError>;

    /// Renderer version string, when obtainable.
    async fn version(&self) -> Option<String>;
}

/// Renderer backed by the `hugo` binary.
pub struct HugoRenderer {
    binary: String,
}

impl Default for HugoRenderer {
    fn default() -> Self {
        Self::new("hugo")
    }
}

impl HugoRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Pull counts out of hugo's summary table; missing rows parse as zero.
    fn parse_summary(output: &str) -> RenderSummary {
        let grab = |pattern: &str| {
            Regex::new(pattern)
                .ok()
                .and_then(|re| re.captures(output))
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .unwrap_or(0)
        };
        RenderSummary {
            pages: grab(r"(?mi)^\s*Pages\s*\|\s*(\d+)"),
            static_files: grab(r"(?mi)^\s*Static files\s*\|\s*(\d+)"),
        }
    }
}

#[async_trait]
impl Renderer for HugoRenderer {
    async fn render(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
    ) -> Result<RenderSummary, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError("canceled before renderer start".to_string()));
        }
        info!(source = %source.display(), destination = %destination.display(), "running hugo");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--source")
            .arg(source)
            .arg("--destination")
            .arg(destination)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(RenderError("canceled during render".to_string())),
            out = cmd.output() => out.map_err(|err| RenderError(err.to_string()))?,
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError(format!(
                "exit status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = Self::parse_summary(&stdout);
        debug!(pages = summary.pages, static_files = summary.static_files, "hugo finished");
        Ok(summary)
    }

    async fn version(&self) -> Option<String> {
        let output = Command::new(&self.binary)
            .arg("version")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Regex::new(r"v(\d+\.\d+\.\d+)")
            .ok()?
            .captures(&stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary_from_hugo_table() {
        let output = "\
                   | EN  \n\
-------------------+-----\n\
  Pages            |  42 \n\
  Paginator pages  |   0 \n\
  Static files     |   7 \n\
  Processed images |   0 \n";
        let summary = HugoRenderer::parse_summary(output);
        assert_eq!(summary.pages, 42);
        assert_eq!(summary.static_files, 7);
    }

    #[test]
    fn test_parse_summary_tolerates_unknown_output() {
        let summary = HugoRenderer::parse_summary("Total in 23 ms\n");
        assert_eq!(summary, RenderSummary::default());
    }

    /// Requires a real `hugo` binary. Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_version_against_real_binary() {
        let renderer = HugoRenderer::default();
        let version = renderer.version().await;
        assert!(version.is_some());
    }
}
