//! Ingestion transaction coordinator
//!
//! One call to [`IngestCoordinator::ingest`] is one pass: load the cursor,
//! read what was appended, then persist rows and the new cursor together.
//! If the commit fails nothing moves and the same bytes are read again on
//! the next trigger.

use arcterx_common::{resolve_path, FileCursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::decode::LineDecoder;
use crate::error::{IngestError, IngestResult};
use crate::reader::IncrementalReader;
use crate::store::IngestStore;

/// Summary of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub path: PathBuf,
    pub prior_offset: u64,
    pub new_offset: u64,
    pub rows: usize,
    /// Rows the store actually inserted or replaced
    pub written: u64,
    pub skipped: usize,
    /// Whether a new cursor was persisted
    pub committed: bool,
}

pub struct IngestCoordinator<D, S> {
    reader: IncrementalReader<D>,
    store: Arc<S>,
}

impl<D, S> IngestCoordinator<D, S>
where
    D: LineDecoder,
    S: IngestStore<D::Row>,
{
    pub fn new(decoder: D, store: Arc<S>) -> Self {
        Self {
            reader: IncrementalReader::new(decoder),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn decoder_name(&self) -> &'static str {
        self.reader.decoder().name()
    }

    /// Run one pass over `path`
    ///
    /// The cursor is keyed by the resolved path, so symlinked or relative
    /// spellings of a file share one cursor.
    pub async fn ingest(&self, path: &Path) -> IngestResult<IngestReport> {
        let path = resolve_path(path).map_err(|e| IngestError::io(path, e))?;
        let prior = self.store.load(&path).await?;
        let outcome = self.reader.read(&path, prior).await?;

        let mut report = IngestReport {
            path: path.clone(),
            prior_offset: outcome.prior_offset,
            new_offset: outcome.new_offset,
            rows: outcome.rows.len(),
            written: 0,
            skipped: outcome.skipped,
            committed: false,
        };

        if let Some(len) = outcome.shrunk_to {
            warn!(
                path = %path.display(),
                prior_offset = outcome.prior_offset,
                len,
                "File is shorter than its stored offset; reset it to reprocess"
            );
            return Ok(report);
        }

        let cursor = FileCursor::new(&path, outcome.new_offset)?;

        if outcome.any_decoded() {
            let stats = self.store.commit(&cursor, &outcome.rows).await?;
            report.written = stats.written;
            report.committed = true;
        } else if outcome.consumed() > 0 {
            // Only skip-worthy lines; move past them so they are not retried forever
            self.store.advance(&cursor).await?;
            report.committed = true;
        }

        if report.committed {
            info!(
                source = self.decoder_name(),
                path = %path.display(),
                prior_offset = report.prior_offset,
                new_offset = report.new_offset,
                rows = report.rows,
                written = report.written,
                skipped = report.skipped,
                "Ingested"
            );
        } else {
            debug!(path = %path.display(), offset = report.prior_offset, "Nothing new");
        }

        Ok(report)
    }

    /// Reset the cursor to 0 and re-read the whole file
    pub async fn reprocess(&self, path: &Path) -> IngestResult<IngestReport> {
        let path = resolve_path(path).map_err(|e| IngestError::io(path, e))?;
        if self.store.reset(&path).await? {
            info!(path = %path.display(), "Cursor reset for reprocessing");
        }
        self.ingest(&path).await
    }
}
