//! # bitsmith-tool
//!
//! Everything that talks to the external hardware-design tool.
//!
//! This crate provides:
//! - Message classification of raw tool output
//! - Per-command output aggregation
//! - A session driver that frames commands with a sentinel marker
//! - The executor abstraction the build layer is written against
//! - Journal watching for GUI-driven operations

mod classifier;
mod executor;
mod gui;
mod journal;
mod output;
mod progress;
mod session;

pub use classifier::{classify, format_message};
pub use executor::{MockExecutor, ToolExecutor};
pub use gui::{GuiAutomation, ScratchWorkspace, JOURNAL_NAME, SCRATCH_PROJECT};
pub use journal::{JournalOutcome, JournalWatcher, JournalWatcherConfig, Liveness, WatchState};
pub use output::CommandOutput;
pub use progress::{pretty_duration, ProgressIndicator, DEFAULT_TICK};
pub use session::{Session, SessionConfig, SENTINEL};
