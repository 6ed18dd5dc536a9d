//! Common types used across the ingestion tools

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ArcterxError, Result};

/// Resume state for one monitored file
///
/// `offset` is the byte position immediately after the last line that was
/// durably committed. It never points into the middle of a line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileCursor {
    pub path: PathBuf,
    pub offset: u64,
}

impl FileCursor {
    /// Create a cursor for an absolute path
    pub fn new(path: impl Into<PathBuf>, offset: u64) -> Result<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(ArcterxError::RelativePath(path));
        }
        Ok(Self { path, offset })
    }

    /// Rebuild a cursor from a `fileposition` row
    pub fn from_row(filename: &str, position: i64) -> Result<Self> {
        let offset = u64::try_from(position).map_err(|_| ArcterxError::NegativeOffset {
            path: filename.to_string(),
            offset: position,
        })?;
        Self::new(filename, offset)
    }

    /// Key used for the `filename` column
    pub fn key(&self) -> String {
        path_key(&self.path)
    }

    /// Offset as stored in the `position` column
    pub fn position(&self) -> Result<i64> {
        i64::try_from(self.offset).map_err(|_| ArcterxError::OffsetOverflow {
            path: self.path.clone(),
            offset: self.offset,
        })
    }
}

impl std::fmt::Display for FileCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path.display(), self.offset)
    }
}

/// Canonical string form of a path used as the offset-store key
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Resolve `path` to the form cursors are stored under
///
/// Symlinks and `..` segments are resolved. A file that no longer exists is
/// resolved through its parent directory so its cursor can still be found.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let absolute = std::path::absolute(path)?;
            if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
                if let Ok(dir) = parent.canonicalize() {
                    return Ok(dir.join(name));
                }
            }
            Ok(absolute)
        }
        Err(e) => Err(e),
    }
}

/// Notification that a path was modified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Detection time
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            timestamp: Utc::now(),
            path: path.into(),
        }
    }
}
