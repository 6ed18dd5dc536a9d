//! Error types shared across the ARCTERX crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shared ARCTERX operations
pub type Result<T> = std::result::Result<T, ArcterxError>;

/// Errors raised by the shared types and helpers
#[derive(Error, Debug)]
pub enum ArcterxError {
    #[error("Path is not absolute: {}", .0.display())]
    RelativePath(PathBuf),

    #[error("Offset {offset} does not fit in the offset column for {}", .path.display())]
    OffsetOverflow { path: PathBuf, offset: u64 },

    #[error("Negative offset {offset} stored for {path}")]
    NegativeOffset { path: String, offset: i64 },
}
