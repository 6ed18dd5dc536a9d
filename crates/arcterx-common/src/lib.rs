//! ARCTERX Common Library
//!
//! Shared types, logging, and error handling for the ARCTERX ingestion tools.
//!
//! # Overview
//!
//! - **Error Handling**: [`ArcterxError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: file cursors and change notifications passed between the
//!   watcher, the scheduler and the offset store
//!
//! # Example
//!
//! ```no_run
//! use arcterx_common::logging::{init_logging, LogConfig};
//! use arcterx_common::types::FileCursor;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let cursor = FileCursor::new("/data/drifter/drifter.202412.csv", 0)?;
//!     tracing::info!(path = %cursor.path.display(), offset = cursor.offset, "cursor");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ArcterxError, Result};
pub use types::{path_key, resolve_path, ChangeEvent, FileCursor};
