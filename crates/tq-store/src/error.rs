//! Errors from batch storage operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from batch storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for tq_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { .. } | StoreError::LockPoisoned(_) => {
                tq_common::Error::Durability(err.to_string())
            }
            StoreError::Json(e) => tq_common::Error::Json(e),
        }
    }
}
