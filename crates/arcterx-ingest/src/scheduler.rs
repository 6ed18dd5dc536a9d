//! Change-driven scheduler
//!
//! Consumes [`ChangeEvent`]s for one data source, waits for each path to
//! settle, then runs one ingestion pass per settled path. Passes run inline
//! on the scheduler task, so a path is never ingested twice at once; events
//! that arrive during a pass wait in the channel and start a fresh cycle
//! when it finishes.

use arcterx_common::ChangeEvent;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

use crate::coordinator::IngestCoordinator;
use crate::decode::LineDecoder;
use crate::error::{IngestError, IngestResult};
use crate::store::IngestStore;

/// How repeated events for a pending path affect its timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebounceMode {
    /// The first event starts one settle delay; later events ride along
    #[default]
    Fixed,
    /// Every event restarts the settle delay
    Sliding,
}

impl FromStr for DebounceMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(DebounceMode::Fixed),
            "sliding" => Ok(DebounceMode::Sliding),
            _ => Err(IngestError::Config(format!(
                "Invalid debounce mode: {} (expected fixed or sliding)",
                s
            ))),
        }
    }
}

impl fmt::Display for DebounceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebounceMode::Fixed => write!(f, "fixed"),
            DebounceMode::Sliding => write!(f, "sliding"),
        }
    }
}

/// Per-path settle timers
#[derive(Debug)]
pub struct Debouncer {
    mode: DebounceMode,
    settle_delay: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(mode: DebounceMode, settle_delay: Duration) -> Self {
        Self {
            mode,
            settle_delay,
            pending: HashMap::new(),
        }
    }

    /// Record an event for `path` seen at `now`
    pub fn observe(&mut self, path: PathBuf, now: Instant) {
        let deadline = now + self.settle_delay;
        match self.mode {
            DebounceMode::Fixed => {
                self.pending.entry(path).or_insert(deadline);
            }
            DebounceMode::Sliding => {
                self.pending.insert(path, deadline);
            }
        }
    }

    /// Earliest deadline among pending paths
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every path whose deadline is at or before `now`
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, deadline)| (*deadline, path.clone()))
            .collect();
        due.sort();

        for (_, path) in &due {
            self.pending.remove(path);
        }
        due.into_iter().map(|(_, path)| path).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Scheduler for one data source
pub struct Scheduler<D, S> {
    coordinator: Arc<IngestCoordinator<D, S>>,
    pattern: Regex,
    debouncer: Debouncer,
    events: mpsc::Receiver<ChangeEvent>,
}

impl<D, S> Scheduler<D, S>
where
    D: LineDecoder + 'static,
    S: IngestStore<D::Row> + 'static,
{
    /// Create a scheduler and the sender its change source writes into
    ///
    /// `pattern` must match a path's whole file name for it to be ingested.
    pub fn new(
        coordinator: Arc<IngestCoordinator<D, S>>,
        pattern: &str,
        mode: DebounceMode,
        settle_delay: Duration,
        capacity: usize,
    ) -> IngestResult<(Self, mpsc::Sender<ChangeEvent>)> {
        let pattern = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| IngestError::Config(format!("Invalid file pattern {}: {}", pattern, e)))?;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let scheduler = Self {
            coordinator,
            pattern,
            debouncer: Debouncer::new(mode, settle_delay),
            events: rx,
        };
        Ok((scheduler, tx))
    }

    /// Whether this source handles `path`
    pub fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.pattern.is_match(name))
    }

    /// Ingest existing files once, ahead of any change events
    pub async fn sweep<I>(&self, paths: I) -> IngestResult<usize>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut paths: Vec<PathBuf> = paths.into_iter().filter(|p| self.accepts(p)).collect();
        paths.sort();

        info!(
            source = self.coordinator.decoder_name(),
            files = paths.len(),
            "Startup sweep"
        );
        for path in &paths {
            self.run_pass(path).await?;
        }
        Ok(paths.len())
    }

    /// Run until the channel closes and every pending path has been ingested
    ///
    /// Only fatal errors end the loop early.
    pub async fn run(mut self) -> IngestResult<()> {
        let source = self.coordinator.decoder_name();
        info!(source, "Scheduler started");

        let mut open = true;
        while open || !self.debouncer.is_empty() {
            let deadline = self.debouncer.next_deadline();

            tokio::select! {
                event = self.events.recv(), if open => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!(source, pending = self.debouncer.len(), "Change source closed");
                        open = false;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for path in self.debouncer.take_due(Instant::now()) {
                        self.run_pass(&path).await?;
                    }
                }
            }
        }

        info!(source, "Scheduler stopped");
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<IngestResult<()>> {
        tokio::spawn(self.run())
    }

    fn on_event(&mut self, event: ChangeEvent) {
        if !self.accepts(&event.path) {
            trace!(path = %event.path.display(), "Ignoring path");
            return;
        }
        trace!(path = %event.path.display(), at = %event.timestamp, "Change observed");
        self.debouncer.observe(event.path, Instant::now());
    }

    async fn run_pass(&self, path: &Path) -> IngestResult<()> {
        match self.coordinator.ingest(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(path = %path.display(), error = %e, "Fatal ingestion error");
                Err(e)
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Ingestion failed; will retry on the next change"
                );
                Ok(())
            }
        }
    }
}
