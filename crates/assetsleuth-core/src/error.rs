/// Error types shared across the core crate.
///
/// Only [`StoreError::InvariantViolation`] represents programmer misuse; every
/// other variant is a recoverable condition the caller handles locally.
use crate::model::RecordKind;
use std::path::PathBuf;
use tracing::warn;

/// Errors raised by the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The id or folder is no longer valid (stale reference after a reset).
    #[error("no record {id} in {folder}/{kind}")]
    NotFound {
        folder: String,
        kind: RecordKind,
        id: usize,
    },

    /// Structural misuse of the store API.
    #[error("record store invariant violated: {0}")]
    InvariantViolation(String),
}

impl StoreError {
    pub(crate) fn not_found(folder: &str, kind: RecordKind, id: usize) -> Self {
        Self::NotFound {
            folder: folder.to_owned(),
            kind,
            id,
        }
    }

    /// `true` for the recoverable stale-reference case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Report a structural misuse of the store.
///
/// Fatal in debug builds. Release builds log and hand the error back so the
/// caller can ignore it; the dataset is rebuilt wholesale on the next reset.
#[track_caller]
pub(crate) fn invariant_violation(message: String) -> StoreError {
    if cfg!(debug_assertions) {
        panic!("record store invariant violated: {message}");
    }
    warn!("Record store invariant violated: {message}");
    StoreError::InvariantViolation(message)
}

/// Errors raised while scanning a location.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("location does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a bookmark database implementation.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid stored value: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while producing a thumbnail.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("error while decoding the image: {0}")]
    Image(#[from] image::ImageError),

    #[error("there was an i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("the image has no pixels")]
    Empty,
}

/// Errors raised while loading or saving configuration files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by [`Browser`](crate::Browser) commands.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0:?} cannot be toggled on its own")]
    UnsupportedFlag(crate::model::RecordFlags),
}
