use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A filesystem operation failed (permission, disk full, missing path).
    #[error("IO error during {op} on '{}': {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested name does not exist (or is not offered).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A submission was rejected before touching the filesystem.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A client-supplied file name has no usable basename.
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
