//! Line decoders
//!
//! Each record format has its own narrow decoder. They share nothing but the
//! [`LineDecoder`] contract: one trimmed line in, one [`Decoded`] out. A
//! decoder never fails a pass for a bad line; it reports
//! [`Decoded::Skipped`] and the reader moves on. [`Decoded::Fatal`] is kept
//! for the cases where continuing would misattribute data.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt::Debug;
use std::path::Path;
use thiserror::Error;

pub mod drifter;
pub mod position;
pub mod scs;
pub mod sfmc;

pub use drifter::{DrifterDecoder, DrifterRow};
pub use position::{PositionDecoder, PositionRow};
pub use scs::{ScsDecoder, ScsRow};
pub use sfmc::{SfmcDecoder, SfmcRow};

/// How storage resolves two rows with the same natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Insert if absent; the first row for a key wins
    KeepFirst,
    /// Upsert; the most recently ingested row for a key wins
    ReplaceWithLatest,
}

/// A decoded row that can be de-duplicated by natural key
pub trait Record: Clone + Debug + Send + Sync + 'static {
    type Key: Ord + Clone + Debug + Send + Sync;

    const CONFLICT: ConflictPolicy;

    fn natural_key(&self) -> Self::Key;
}

/// Why a line produced no row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Blank,
    Header,
    /// Fewer columns than the format requires, usually a line cut short
    Truncated { found: usize, required: usize },
    BadTimestamp(String),
    Malformed(String),
    UnsupportedCode(String),
    /// Well formed, but the format says to drop it (e.g. an invalid fix)
    Filtered(&'static str),
}

/// Errors that abort a whole pass over a file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot identify an instrument from file name {0}")]
    UnknownInstrument(String),

    #[error("unexpected header: expected {expected}, found {found}")]
    UnexpectedHeader { expected: String, found: String },

    #[error("file name is not valid UTF-8")]
    BadFileName,
}

/// Outcome of decoding one line
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<R> {
    Row(R),
    Skipped(SkipReason),
    Fatal(DecodeError),
}

impl<R> Decoded<R> {
    pub fn skipped(reason: SkipReason) -> Self {
        Decoded::Skipped(reason)
    }

    pub fn row(self) -> Option<R> {
        match self {
            Decoded::Row(row) => Some(row),
            _ => None,
        }
    }
}

/// Format-specific line decoding
pub trait LineDecoder: Send + Sync {
    type Row: Record;

    /// Per-file state derived from the path (glider name, instrument code)
    type Context: Send + Sync;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn context(&self, path: &Path) -> Result<Self::Context, DecodeError>;

    /// Decode one line that has already been trimmed
    fn decode(&self, ctx: &Self::Context, line: &str) -> Decoded<Self::Row>;

    /// Decode the line that starts at byte 0 of the file
    ///
    /// Formats with a column header validate it here; everywhere else a
    /// bad line is skipped.
    fn decode_first(&self, ctx: &Self::Context, line: &str) -> Decoded<Self::Row> {
        self.decode(ctx, line)
    }
}

// ============================================================================
// Field helpers shared by the decoders
// ============================================================================

/// Parse a float, treating empty, `None` and non-finite values as missing
pub(crate) fn parse_optional_f64(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("none") {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(crate) fn valid_latitude(value: Option<f64>) -> Option<f64> {
    value.filter(|v| (-90.0..=90.0).contains(v))
}

pub(crate) fn valid_longitude(value: Option<f64>) -> Option<f64> {
    value.filter(|v| (-180.0..=180.0).contains(v))
}

/// Epoch seconds (possibly fractional) to UTC
pub(crate) fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"];

/// ISO-like timestamps; naive times are taken as UTC
pub(crate) fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    let field = field.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(field) {
        return Some(t.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(t) = DateTime::parse_from_str(field, format) {
            return Some(t.with_timezone(&Utc));
        }
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(field, format).ok())
        .map(|naive| naive.and_utc())
}
