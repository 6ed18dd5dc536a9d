//! Incremental file reader
//!
//! Reads a growing file from a stored byte offset, one complete line at a
//! time. A trailing line without its newline is left for the next pass, so
//! the returned offset always sits on a line boundary.

use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::trace;

use crate::decode::{Decoded, LineDecoder};
use crate::error::{IngestError, IngestResult};

/// Result of one pass over a file
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome<R> {
    pub rows: Vec<R>,
    pub prior_offset: u64,
    /// Position just after the last complete line consumed
    pub new_offset: u64,
    /// Complete lines consumed
    pub lines: usize,
    /// Lines that produced no row
    pub skipped: usize,
    /// Current file length when it is shorter than `prior_offset`
    pub shrunk_to: Option<u64>,
}

impl<R> ReadOutcome<R> {
    fn unchanged(prior_offset: u64) -> Self {
        Self {
            rows: Vec::new(),
            prior_offset,
            new_offset: prior_offset,
            lines: 0,
            skipped: 0,
            shrunk_to: None,
        }
    }

    pub fn any_decoded(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Bytes consumed by this pass
    pub fn consumed(&self) -> u64 {
        self.new_offset - self.prior_offset
    }
}

/// Reads new lines of a file through one decoder
#[derive(Debug, Clone)]
pub struct IncrementalReader<D> {
    decoder: D,
}

impl<D: LineDecoder> IncrementalReader<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Decode every complete line after `prior_offset`
    ///
    /// `None` means the file has never been seen and is read from the start.
    /// Only file access problems and [`Decoded::Fatal`] lines fail the pass.
    pub async fn read(
        &self,
        path: &Path,
        prior_offset: Option<u64>,
    ) -> IngestResult<ReadOutcome<D::Row>> {
        let prior = prior_offset.unwrap_or(0);
        let ctx = self
            .decoder
            .context(path)
            .map_err(|source| IngestError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        let mut file = File::open(path)
            .await
            .map_err(|e| IngestError::io(path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| IngestError::io(path, e))?
            .len();

        if len < prior {
            return Ok(ReadOutcome {
                shrunk_to: Some(len),
                ..ReadOutcome::unchanged(prior)
            });
        }
        if prior > 0 {
            file.seek(SeekFrom::Start(prior))
                .await
                .map_err(|e| IngestError::io(path, e))?;
        }

        let mut reader = BufReader::new(file);
        let mut outcome = ReadOutcome::unchanged(prior);
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| IngestError::io(path, e))?;

            // EOF, or a line the writer has not finished yet
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }

            let start = outcome.new_offset;
            outcome.new_offset += n as u64;
            outcome.lines += 1;

            let line = String::from_utf8_lossy(&buf);
            let decoded = if start == 0 {
                self.decoder.decode_first(&ctx, line.trim())
            } else {
                self.decoder.decode(&ctx, line.trim())
            };
            match decoded {
                Decoded::Row(row) => outcome.rows.push(row),
                Decoded::Skipped(reason) => {
                    outcome.skipped += 1;
                    trace!(
                        path = %path.display(),
                        offset = start,
                        ?reason,
                        "Skipped line"
                    );
                }
                Decoded::Fatal(source) => {
                    return Err(IngestError::Decode {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }

        Ok(outcome)
    }
}
