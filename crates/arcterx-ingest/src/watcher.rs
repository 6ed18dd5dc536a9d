//! Polling change source
//!
//! Walks the watched directories at a fixed interval and emits a
//! [`ChangeEvent`] for every file that appeared or whose size or
//! modification time changed since the previous walk.

use arcterx_common::ChangeEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    len: u64,
    modified: Option<SystemTime>,
}

type Snapshot = HashMap<PathBuf, FileState>;

/// Walk `dirs` recursively and record every regular file
fn snapshot(dirs: &[PathBuf]) -> IngestResult<Snapshot> {
    let mut files = Snapshot::new();
    for dir in dirs {
        if !dir.is_dir() {
            return Err(IngestError::SourceVanished(dir.clone()));
        }
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Files can disappear between listing and stat
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                files.insert(
                    entry.into_path(),
                    FileState {
                        len: meta.len(),
                        modified: meta.modified().ok(),
                    },
                );
            }
        }
    }
    Ok(files)
}

/// Paths that are new or differ from `before`
fn changed(before: &Snapshot, after: &Snapshot) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = after
        .iter()
        .filter(|(path, state)| before.get(*path) != Some(*state))
        .map(|(path, _)| path.clone())
        .collect();
    paths.sort();
    paths
}

pub struct PollingWatcher {
    dirs: Vec<PathBuf>,
    poll_interval: Duration,
    seen: Snapshot,
    tx: mpsc::Sender<ChangeEvent>,
}

impl PollingWatcher {
    pub fn new(tx: mpsc::Sender<ChangeEvent>, poll_interval: Duration) -> Self {
        Self {
            dirs: Vec::new(),
            poll_interval,
            seen: Snapshot::new(),
            tx,
        }
    }

    /// Watch `dir` and everything below it
    pub fn add_watch(&mut self, dir: impl AsRef<Path>) -> IngestResult<()> {
        let dir = dir.as_ref();
        let dir = dir.canonicalize().map_err(|e| IngestError::io(dir, e))?;
        if !dir.is_dir() {
            return Err(IngestError::Config(format!(
                "Not a directory: {}",
                dir.display()
            )));
        }
        if !self.dirs.contains(&dir) {
            info!(dir = %dir.display(), "Watching");
            self.dirs.push(dir);
        }
        Ok(())
    }

    /// Record the current state of every file and return their paths
    ///
    /// Files listed here only produce events once they change again.
    pub async fn prime(&mut self) -> IngestResult<Vec<PathBuf>> {
        self.seen = self.walk().await?;
        let mut paths: Vec<PathBuf> = self.seen.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    /// One walk; returns the paths that changed since the last one
    pub async fn poll(&mut self) -> IngestResult<Vec<PathBuf>> {
        let current = self.walk().await?;
        let paths = changed(&self.seen, &current);
        self.seen = current;
        Ok(paths)
    }

    /// Poll until the receiving scheduler goes away
    pub async fn run(mut self) -> IngestResult<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            for path in self.poll().await? {
                if self.tx.send(ChangeEvent::new(path)).await.is_err() {
                    debug!("Scheduler gone; stopping watcher");
                    return Ok(());
                }
            }
        }
    }

    async fn walk(&self) -> IngestResult<Snapshot> {
        let dirs = self.dirs.clone();
        match tokio::task::spawn_blocking(move || snapshot(&dirs)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Directory walk task failed");
                Ok(self.seen.clone())
            }
        }
    }
}
