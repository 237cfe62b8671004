use std::path::PathBuf;

use skillcast_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A derived path escapes its intended base directory. Fatal for the
    /// operation that produced it; never retried, never truncated.
    #[error("path '{path}' escapes base directory '{base}'")]
    PathTraversal { base: PathBuf, path: PathBuf },

    /// Destination exists with different content. The caller decides between
    /// overwrite and abort; byte-identical content never raises this.
    #[error("'{path}' already exists with different content (pass --force to overwrite)")]
    Conflict { path: PathBuf },

    /// Directory locked or held open by another process; the item is skipped,
    /// not the batch.
    #[error("'{path}' is busy: {source}")]
    ResourceBusy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("skill '{0}' is not installed")]
    NotInstalled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

skillcast_common::impl_context!();
