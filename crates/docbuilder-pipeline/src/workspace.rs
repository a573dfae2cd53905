//! Scratch directory holding all cloned repositories for one build.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A per-build workspace with scoped cleanup: the directory is removed when
/// the guard drops, on every exit path.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `root`, or the system temp directory
    /// when no root is configured.
    pub async fn create(root: Option<&Path>) -> std::io::Result<Self> {
        let base = root
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::env::temp_dir().join("docbuilder"));
        let path = base.join(format!("build-{}", uuid::Uuid::now_v7()));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "workspace created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "workspace cleanup failed");
            }
        }
    }
}
