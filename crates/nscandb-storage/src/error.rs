use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: cannot parse: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{entity}/{id}: build failed: {message}")]
    BuildFailed {
        entity: String,
        id: String,
        message: String,
    },

    /// Unknown entity; the directory does not exist.
    #[error("{}: not found", path.display())]
    NotFound { path: PathBuf },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            CacheError::NotFound { path }
        } else {
            CacheError::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}
