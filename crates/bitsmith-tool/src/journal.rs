//! Journal watching for GUI-driven operations
//!
//! The tool appends one line to its journal for every command it runs on the
//! user's behalf. We poll the file for new lines and hand the whole history to
//! a predicate that recognises when the user has finished.

use bitsmith_core::{BitsmithError, Console, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::progress::{ProgressIndicator, DEFAULT_TICK};

/// Where a GUI operation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Setup,
    Launched,
    Polling,
    Completed,
    Cancelled,
    Failed,
}

/// How a watched GUI operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOutcome {
    /// The predicate matched; every journal line seen, oldest first
    Completed(Vec<String>),
    /// The tool went away before the predicate matched
    Cancelled,
}

/// Something whose process may exit underneath us
pub trait Liveness {
    fn is_alive(&mut self) -> bool;
}

#[derive(Debug, Clone)]
pub struct JournalWatcherConfig {
    pub poll_interval: Duration,
    pub tick: Duration,
    pub progress_width: usize,
}

impl Default for JournalWatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_TICK / 2,
            tick: DEFAULT_TICK,
            progress_width: 30,
        }
    }
}

pub struct JournalWatcher {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
    lines: Vec<String>,
    state: WatchState,
    config: JournalWatcherConfig,
}

impl JournalWatcher {
    /// Create (or truncate) the journal at `path` and open it for watching
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        Self::create_with_config(path, JournalWatcherConfig::default()).await
    }

    pub async fn create_with_config(path: impl Into<PathBuf>, config: JournalWatcherConfig) -> Result<Self> {
        let path = path.into();
        let journal_err =
            |e: std::io::Error| BitsmithError::Journal(format!("{}: {}", path.display(), e));

        File::create(&path).await.map_err(journal_err)?;
        let file = File::open(&path).await.map_err(journal_err)?;
        debug!("Watching journal {}", path.display());

        Ok(Self {
            path,
            file,
            pending: Vec::new(),
            lines: Vec::new(),
            state: WatchState::Setup,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn mark_launched(&mut self) {
        self.state = WatchState::Launched;
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Read whatever was appended since the last call.
    ///
    /// Returns the number of new complete lines. A trailing partial line is
    /// held back until its newline arrives.
    pub async fn poll(&mut self) -> Result<usize> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf).await.map_err(|e| {
            self.state = WatchState::Failed;
            BitsmithError::Journal(format!("{}: {}", self.path.display(), e))
        })?;
        self.pending.extend_from_slice(&buf);

        let mut added = 0;
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            self.lines.push(line.trim_end_matches('\r').to_string());
            added += 1;
        }
        Ok(added)
    }

    /// Poll until `predicate` accepts the journal or `process` exits
    pub async fn wait<L, P>(&mut self, process: &mut L, mut predicate: P, console: &Console) -> Result<JournalOutcome>
    where
        L: Liveness + ?Sized,
        P: FnMut(&[String]) -> bool,
    {
        self.state = WatchState::Polling;
        info!("Polling journal {}", self.path.display());

        let mut bar = ProgressIndicator::new(2 * (1 + console.depth()), self.config.progress_width);
        let mut last_tick = Instant::now();

        loop {
            let added = self.poll().await?;
            if added > 0 && predicate(&self.lines) {
                bar.clear();
                self.state = WatchState::Completed;
                debug!("Journal predicate matched after {} lines", self.lines.len());
                return Ok(JournalOutcome::Completed(std::mem::take(&mut self.lines)));
            }

            if !process.is_alive() {
                bar.clear();
                self.state = WatchState::Cancelled;
                warn!("Tool exited while waiting on journal");
                return Ok(JournalOutcome::Cancelled);
            }

            if last_tick.elapsed() >= self.config.tick {
                last_tick = Instant::now();
                bar.update();
                bar.draw();
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

impl Drop for JournalWatcher {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove journal {}: {}", self.path.display(), e);
        }
    }
}
