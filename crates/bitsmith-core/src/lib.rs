//! # bitsmith-core
//!
//! Core types for the bitsmith FPGA build orchestrator.
//!
//! bitsmith drives an external hardware-design tool through its line-oriented
//! Tcl REPL. This crate holds what every other layer shares:
//!
//! - Classified tool messages and the policy that filters them
//! - Scoped depth counters (message nesting, console indentation)
//! - Project configuration (`bitsmith.json`) and the discovered project layout
//! - The unified error type

mod config;
mod console;
mod error;
mod message;
mod project;
mod scope;

pub use config::{
    BdConfig, IpConfig, MessagesConfig, ProjectConfig, SourcesConfig, INSTALL_DIR_FILENAME,
    PROJECT_FILENAME,
};
pub use console::Console;
pub use error::{BitsmithError, Result};
pub use message::{Location, Message, MessagePolicy, Severity};
pub use project::{BlockDesign, IpInstance, Project, SourceSet};
pub use scope::{DepthGuard, ScopedDepth};
