//! Ingestion error types

use std::path::PathBuf;
use thiserror::Error;

use crate::decode::DecodeError;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Failures surfaced by a reader pass or a store operation
///
/// Decode problems on individual lines never show up here; they are skipped
/// inside the reader. What remains either leaves the cursor where it was for
/// the next change event to retry, or is fatal ([`IngestError::is_fatal`])
/// and stops the process.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Fatal decode error in {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Common(#[from] arcterx_common::ArcterxError),

    #[error("Store rejected commit for {}: {reason}", .path.display())]
    Rejected { path: PathBuf, reason: String },

    #[error("Watched directory is gone: {}", .0.display())]
    SourceVanished(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error should stop the whole monitor
    ///
    /// Everything scoped to one file (access problems, dropped connections,
    /// rolled back commits, a file the decoder cannot handle) is retried on
    /// the next trigger. The remaining variants here stop the monitor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Migration(_) | IngestError::Config(_) | IngestError::SourceVanished(_)
        )
    }
}
