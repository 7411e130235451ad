//! Unified error types for bitsmith

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all bitsmith operations
#[derive(Error, Debug)]
pub enum BitsmithError {
    // Environment errors: nothing sensible can be retried after these
    #[error("could not find tool binary at '{}'", .0.display())]
    ToolNotFound(PathBuf),

    #[error("failed to launch tool: {0}")]
    ToolLaunch(String),

    #[error("unexpected tool output!\ngot:\n{0}")]
    UnexpectedBanner(String),

    #[error("part '{0}' does not exist (check licenses?)")]
    UnknownPart(String),

    // Session errors
    #[error("subprocess terminated unexpectedly")]
    SessionTerminated,

    #[error("command failed: {0}")]
    Command(String),

    // Build errors
    #[error("{stage}: {reason}")]
    Stage { stage: String, reason: String },

    // Automation errors
    #[error("journal error: {0}")]
    Journal(String),

    // Project errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("project error: {0}")]
    Project(String),

    #[error("ip '{0}' does not exist; try 'ip list'")]
    IpNotFound(String),

    #[error("block design '{0}' does not exist; try 'bd list'")]
    BlockDesignNotFound(String),

    #[error("'{}' already exists, refusing to overwrite", .0.display())]
    AlreadyExists(PathBuf),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl BitsmithError {
    /// Build a stage failure
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the tool environment itself is unusable.
    ///
    /// Callers should report these once and stop; there is no recovery path.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::ToolLaunch(_)
                | Self::UnexpectedBanner(_)
                | Self::UnknownPart(_)
        )
    }
}

/// Result type alias using BitsmithError
pub type Result<T> = std::result::Result<T, BitsmithError>;
