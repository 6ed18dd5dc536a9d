//! ARCTERX incremental ingestion
//!
//! Tails growing data files from the field campaign into PostgreSQL. Each
//! data source runs its own pipeline:
//!
//! ```text
//! PollingWatcher -> Scheduler (debounce) -> IngestCoordinator
//!                                             -> IncrementalReader -> LineDecoder
//!                                             -> IngestStore (rows + cursor, one transaction)
//! ```
//!
//! The cursor stored per file is the byte offset just past the last line
//! committed, so a crash at any point replays at most the uncommitted lines
//! and natural-key conflict handling absorbs the replay.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod reader;
pub mod scheduler;
pub mod store;
pub mod watcher;

pub use config::{DatabaseConfig, IngestConfig, MonitorConfig};
pub use coordinator::{IngestCoordinator, IngestReport};
pub use decode::{ConflictPolicy, DecodeError, Decoded, LineDecoder, Record, SkipReason};
pub use error::{IngestError, IngestResult};
pub use reader::{IncrementalReader, ReadOutcome};
pub use scheduler::{DebounceMode, Debouncer, Scheduler};
pub use store::{CommitStats, IngestStore, MemoryStore, OffsetStore, PgRecord, PgStore};
pub use watcher::PollingWatcher;
