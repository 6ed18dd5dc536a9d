//! Offset and row storage
//!
//! [`OffsetStore`] owns the per-file cursors. [`IngestStore`] adds the one
//! operation the coordinator needs: write a batch of rows and the cursor
//! that follows them as a single atomic unit.

use arcterx_common::FileCursor;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use crate::decode::{ConflictPolicy, Record};
use crate::error::IngestResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgRecord, PgStore};

/// Result of one committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Rows handed to the store after in-batch de-duplication
    pub submitted: usize,
    /// Rows actually inserted or replaced
    pub written: u64,
}

/// Persistent mapping from file path to last committed byte offset
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Stored offset for `path`, `None` on first sight
    async fn load(&self, path: &Path) -> IngestResult<Option<u64>>;

    /// Upsert a cursor without writing any rows
    async fn advance(&self, cursor: &FileCursor) -> IngestResult<()>;

    /// Set the cursor back to 0 so the next pass re-reads the whole file
    ///
    /// Returns false when the path had no cursor.
    async fn reset(&self, path: &Path) -> IngestResult<bool>;
}

/// Row store paired with the offset store
#[async_trait]
pub trait IngestStore<R: Record>: OffsetStore {
    /// Write `rows` and `cursor` in one transaction
    ///
    /// Either both become visible or neither does.
    async fn commit(&self, cursor: &FileCursor, rows: &[R]) -> IngestResult<CommitStats>;
}

/// Collapse rows that share a natural key inside one batch
///
/// A single upsert statement may not touch the same key twice, and the
/// outcome has to match what row-by-row insertion would give: the first row
/// survives under [`ConflictPolicy::KeepFirst`], the last one under
/// [`ConflictPolicy::ReplaceWithLatest`]. Input order is otherwise kept.
pub fn dedupe_batch<R: Record>(rows: &[R]) -> Vec<R> {
    let mut slots: BTreeMap<R::Key, usize> = BTreeMap::new();
    let mut kept: Vec<R> = Vec::with_capacity(rows.len());

    for row in rows {
        match slots.get(&row.natural_key()) {
            Some(&slot) => {
                if R::CONFLICT == ConflictPolicy::ReplaceWithLatest {
                    kept[slot] = row.clone();
                }
            }
            None => {
                slots.insert(row.natural_key(), kept.len());
                kept.push(row.clone());
            }
        }
    }

    kept
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct First(u32, &'static str);

    impl Record for First {
        type Key = u32;
        const CONFLICT: ConflictPolicy = ConflictPolicy::KeepFirst;
        fn natural_key(&self) -> u32 {
            self.0
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Latest(u32, &'static str);

    impl Record for Latest {
        type Key = u32;
        const CONFLICT: ConflictPolicy = ConflictPolicy::ReplaceWithLatest;
        fn natural_key(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let rows = [First(1, "a"), First(2, "b"), First(1, "c")];
        assert_eq!(dedupe_batch(&rows), vec![First(1, "a"), First(2, "b")]);
    }

    #[test]
    fn test_dedupe_keeps_latest_in_place() {
        let rows = [Latest(1, "a"), Latest(2, "b"), Latest(1, "c")];
        assert_eq!(dedupe_batch(&rows), vec![Latest(1, "c"), Latest(2, "b")]);
    }
}
