//! Error types surfaced by the build service.

use thiserror::Error;

use crate::stage::Stage;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error("filesystem ({op}): {source}")]
    Filesystem {
        op: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build ({stage}): {message}")]
    Build { stage: Stage, message: String },

    #[error("hugo: {0}")]
    Hugo(String),

    #[error("canceled")]
    Canceled,
}

impl Error {
    pub fn filesystem(op: impl Into<String>, source: std::io::Error) -> Self {
        Error::Filesystem {
            op: op.into(),
            source,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
