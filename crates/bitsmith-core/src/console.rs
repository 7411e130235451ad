//! User-facing progress output.
//!
//! Diagnostics go through `tracing`; this is what the person running a build
//! reads. Indentation is carried by the console value itself rather than a
//! global counter.

use colored::Colorize;
use std::fmt::Display;

use crate::message::Severity;
use crate::scope::{DepthGuard, ScopedDepth};

const INDENT_WIDTH: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct Console {
    indent: ScopedDepth,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indent subsequent output until the guard is dropped
    pub fn indent(&self) -> DepthGuard {
        self.indent.enter()
    }

    pub fn depth(&self) -> usize {
        self.indent.get()
    }

    /// Leading whitespace for the current depth plus `extra` levels
    pub fn indent_str(&self, extra: usize) -> String {
        " ".repeat((self.depth() + extra) * INDENT_WIDTH)
    }

    pub fn log(&self, msg: impl Display) {
        println!(
            "{}{} {}",
            self.indent_str(0),
            Severity::Info.colourise("[log]"),
            msg
        );
    }

    pub fn warn(&self, msg: impl Display) {
        println!(
            "{}{} {}",
            self.indent_str(0),
            Severity::Warning.colourise("[wrn]"),
            msg
        );
    }

    pub fn error(&self, msg: impl Display) {
        eprintln!(
            "{}{} {}",
            self.indent_str(0),
            Severity::Error.colourise("[err]"),
            msg
        );
    }

    /// A `+ item` line, one level deeper than the current depth
    pub fn added(&self, item: impl Display) {
        println!("{}{} {}", self.indent_str(1), "+".green(), item);
    }

    /// A `- item` line, one level deeper than the current depth
    pub fn removed(&self, item: impl Display) {
        println!("{}{} {}", self.indent_str(1), "-".red(), item);
    }

    /// Print an already-rendered line at the current depth plus one
    pub fn line(&self, text: impl Display) {
        println!("{}{}", self.indent_str(1), text);
    }

    pub fn blank(&self) {
        println!();
    }
}
