//! Tool messages and the policy that decides which ones are shown

use colored::{ColoredString, Colorize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::scope::{DepthGuard, ScopedDepth};

/// Message severity, ordered from least to most severe.
///
/// The tool never prints `Log`; it only appears through severity overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    Info,
    Log,
    Warning,
    CriticalWarning,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Log,
        Severity::Warning,
        Severity::CriticalWarning,
        Severity::Error,
    ];

    /// Numeric level, 0 (info) through 4 (error)
    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn from_level(level: i64) -> Option<Self> {
        usize::try_from(level)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Prefix the tool prints in front of a message of this severity
    pub fn prefix(self) -> &'static str {
        match self {
            Severity::Info => "INFO: ",
            Severity::Log => "LOG: ",
            Severity::Warning => "WARNING: ",
            Severity::CriticalWarning => "CRITICAL WARNING: ",
            Severity::Error => "ERROR: ",
        }
    }

    /// Short tag used when rendering, padded to a common width
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Info => "[info] ",
            Severity::Log => "[log]  ",
            Severity::Warning => "[warn] ",
            Severity::CriticalWarning => "[crit] ",
            Severity::Error => "[error]",
        }
    }

    pub fn colourise(self, text: &str) -> ColoredString {
        match self {
            Severity::Info => text.blue(),
            Severity::Log => text.green(),
            Severity::Warning => text.yellow(),
            Severity::CriticalWarning => text.bright_red(),
            Severity::Error => text.red().bold(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Log => "log",
            Severity::Warning => "warning",
            Severity::CriticalWarning => "critical warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "log" => Ok(Severity::Log),
            "warn" | "warning" => Ok(Severity::Warning),
            "crit" | "critical warning" => Ok(Severity::CriticalWarning),
            "error" => Ok(Severity::Error),
            _ => Err(format!("invalid severity '{}'", s)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeverityRepr {
    Level(i64),
    Name(String),
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SeverityRepr::deserialize(deserializer)? {
            SeverityRepr::Level(level) => Severity::from_level(level).ok_or_else(|| {
                de::Error::custom(format!(
                    "expected integer between 0 and 4, found {}",
                    level
                ))
            }),
            SeverityRepr::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Source location attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// One classified line of tool output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Effective severity (after overrides)
    pub severity: Severity,
    /// Severity taken from the line prefix
    pub intrinsic: Severity,
    pub code: String,
    pub text: String,
    pub location: Option<Location>,
    /// Recorded but not displayed
    pub suppressed: bool,
}

impl Message {
    /// Render for display, without the leading indentation
    pub fn render(&self, policy: &MessagePolicy) -> String {
        let mut body = self.text.clone();
        if let Some(loc) = &self.location {
            body.push_str(&format!(" ({})", loc));
        }
        if policy.print_message_ids {
            body.push_str(&format!(" (id: {})", self.code));
        }

        format!("{} {}", self.severity.colourise(self.severity.tag()), body)
    }
}

/// Severity overrides, suppressions and display thresholds.
///
/// The nesting depth is shared between clones, so a guard taken on the
/// project's policy also affects the copy a session classifies with.
#[derive(Debug, Clone, Default)]
pub struct MessagePolicy {
    /// Threshold outside nested (IP) regions
    pub min_severity: Severity,
    /// Threshold inside nested (IP) regions
    pub min_nested_severity: Severity,
    pub print_message_ids: bool,
    pub severity_overrides: HashMap<String, Severity>,
    pub suppressions: HashSet<String>,
    nesting: ScopedDepth,
}

impl MessagePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_severity(mut self, normal: Severity, nested: Severity) -> Self {
        self.min_severity = normal;
        self.min_nested_severity = nested;
        self
    }

    pub fn with_override(mut self, code: impl Into<String>, severity: Severity) -> Self {
        self.severity_overrides.insert(code.into(), severity);
        self
    }

    pub fn with_suppression(mut self, code: impl Into<String>) -> Self {
        self.suppressions.insert(code.into());
        self
    }

    /// Override if one exists for `code`, else the intrinsic severity
    pub fn effective_severity(&self, code: &str, intrinsic: Severity) -> Severity {
        self.severity_overrides
            .get(code)
            .copied()
            .unwrap_or(intrinsic)
    }

    /// Threshold currently in force
    pub fn threshold(&self) -> Severity {
        if self.nesting.is_nested() {
            self.min_nested_severity
        } else {
            self.min_severity
        }
    }

    pub fn is_suppressed(&self, code: &str, effective: Severity) -> bool {
        self.suppressions.contains(code) || effective < self.threshold()
    }

    /// Enter a nested region (IP regeneration or synthesis)
    pub fn enter_nested(&self) -> DepthGuard {
        self.nesting.enter()
    }

    pub fn nesting(&self) -> &ScopedDepth {
        &self.nesting
    }
}
