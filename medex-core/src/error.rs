use std::path::PathBuf;
use thiserror::Error;

/// Failure while spawning or driving an external program.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{bin} exited with status {code}: {stderr}")]
    Failed {
        bin: String,
        code: i32,
        stderr: String,
    },

    #[error("i/o while driving {bin}: {source}")]
    Io {
        bin: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error raised by a [`crate::catalog::Catalog`] backend.
#[derive(Debug, Error)]
#[error("catalog: {0}")]
pub struct CatalogError(pub String);

/// Error raised by a [`crate::search::SearchIndex`] backend.
#[derive(Debug, Error)]
#[error("search index: {0}")]
pub struct SearchError(pub String);

/// Per-file and per-run failures of the indexing pipeline.
///
/// Every variant except `Fatal` is confined to one file or one catalog
/// operation: the slot is released, `stats.failed` advances, and the run
/// continues. There are no retries; the next scan picks failed files up
/// again through the skip check.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("scanning {path} failed: {reason}")]
    Scan { path: PathBuf, reason: String },

    #[error("hashing {path} failed: {reason}")]
    HashFailed { path: PathBuf, reason: String },

    #[error("probing {path} failed: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("converting {path} failed: {reason}")]
    ConvertFailed { path: PathBuf, reason: String },

    #[error("thumbnail for {path} failed: {source}")]
    ThumbnailFailed {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("preview for {path} failed: {source}")]
    PreviewFailed {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("sound check for {path} failed: {source}")]
    SoundCheckFailed {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("subtitle extraction for {path} failed: {reason}")]
    SubtitleExtractFailed { path: PathBuf, reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Startup failure (catalog, search index or configuration); aborts the
    /// process with a non-zero exit.
    #[error("startup failed: {0}")]
    Fatal(String),
}

impl IndexError {
    pub(crate) fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        IndexError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
