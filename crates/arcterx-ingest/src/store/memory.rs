//! In-process store
//!
//! Keeps cursors and rows in memory with the same conflict semantics as the
//! PostgreSQL tables. The coordinator and scheduler tests run against it and
//! can make the next commit fail to exercise rollback.

use arcterx_common::{path_key, resolve_path, FileCursor};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{dedupe_batch, CommitStats, IngestStore, OffsetStore};
use crate::decode::{ConflictPolicy, Record};
use crate::error::{IngestError, IngestResult};

#[derive(Debug)]
struct Tables<R: Record> {
    offsets: HashMap<String, u64>,
    rows: BTreeMap<R::Key, R>,
}

#[derive(Debug)]
pub struct MemoryStore<R: Record> {
    tables: Mutex<Tables<R>>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                offsets: HashMap::new(),
                rows: BTreeMap::new(),
            }),
            fail_next_commit: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make the next [`IngestStore::commit`] roll back with an error
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of commit attempts, successful or not
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// All rows in natural-key order
    pub fn rows(&self) -> Vec<R> {
        self.with_tables(|t| t.rows.values().cloned().collect())
    }

    /// Stored offset for `path`, resolved the way the coordinator keys it
    pub fn offset(&self, path: &Path) -> Option<u64> {
        let path = resolve_path(path).unwrap_or_else(|_| path.to_path_buf());
        self.with_tables(|t| t.offsets.get(&path_key(&path)).copied())
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables<R>) -> T) -> T {
        // A poisoned lock only means another test thread panicked
        let mut guard = match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl<R: Record> OffsetStore for MemoryStore<R> {
    async fn load(&self, path: &Path) -> IngestResult<Option<u64>> {
        Ok(self.offset(path))
    }

    async fn advance(&self, cursor: &FileCursor) -> IngestResult<()> {
        cursor.position()?;
        self.with_tables(|t| t.offsets.insert(cursor.key(), cursor.offset));
        Ok(())
    }

    async fn reset(&self, path: &Path) -> IngestResult<bool> {
        Ok(self.with_tables(|t| match t.offsets.get_mut(&path_key(path)) {
            Some(offset) => {
                *offset = 0;
                true
            }
            None => false,
        }))
    }
}

#[async_trait]
impl<R: Record> IngestStore<R> for MemoryStore<R> {
    async fn commit(&self, cursor: &FileCursor, rows: &[R]) -> IngestResult<CommitStats> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        cursor.position()?;

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(IngestError::Rejected {
                path: cursor.path.clone(),
                reason: "injected commit failure".to_string(),
            });
        }

        let batch = dedupe_batch(rows);
        let submitted = batch.len();

        let written = self.with_tables(|t| {
            let mut written = 0u64;
            for row in batch {
                let key = row.natural_key();
                match R::CONFLICT {
                    ConflictPolicy::KeepFirst => {
                        if !t.rows.contains_key(&key) {
                            t.rows.insert(key, row);
                            written += 1;
                        }
                    }
                    ConflictPolicy::ReplaceWithLatest => {
                        t.rows.insert(key, row);
                        written += 1;
                    }
                }
            }
            t.offsets.insert(cursor.key(), cursor.offset);
            written
        });

        Ok(CommitStats { submitted, written })
    }
}
