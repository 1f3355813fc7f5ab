// src/error.rs

use std::fmt;
use std::io;
use thiserror::Error;

/// A policy veto raised by a trigger
///
/// Fatal to the whole merge operation. `paths` is sorted so the message is
/// reproducible across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockModification {
    /// Label of the trigger that raised the veto
    pub trigger: String,
    /// Human-readable description
    pub message: String,
    /// Offending paths, sorted
    pub paths: Vec<String>,
}

impl BlockModification {
    pub fn new(trigger: impl Into<String>, message: impl Into<String>, mut paths: Vec<String>) -> Self {
        paths.sort();
        Self {
            trigger: trigger.into(),
            message: message.into(),
            paths,
        }
    }
}

impl fmt::Display for BlockModification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.trigger, self.message)
    }
}

/// Core error types for the merge engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A trigger vetoed the operation
    #[error("merge blocked by {0}")]
    BlockModification(BlockModification),

    /// Trigger or engine misconfiguration, detected at registration time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attempted mutation of a frozen content set
    #[error("Content set '{0}' is frozen")]
    FrozenContentSet(String),

    /// Malformed location
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Location escapes the merge offset
    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    /// Bad glob or regex in domain settings
    #[error("Invalid pattern: {0}")]
    Pattern(String),

    /// Unknown algorithm or malformed digest
    #[error("Checksum error: {0}")]
    Checksum(#[from] crate::hash::HashError),

    /// Installed-contents record could not be (de)serialized
    #[error("Record error: {0}")]
    Record(#[from] serde_json::Error),

    /// Domain settings could not be parsed
    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    /// External helper failed
    #[error("Trigger error: {0}")]
    TriggerError(String),
}

impl Error {
    /// True for the "entry raced away" class of I/O errors (ENOENT, ENOTDIR)
    pub fn is_missing_target(&self) -> bool {
        match self {
            Error::Io(e) => is_missing_target(e),
            _ => false,
        }
    }
}

impl From<BlockModification> for Error {
    fn from(block: BlockModification) -> Self {
        Error::BlockModification(block)
    }
}

/// True when an I/O error means the path (or one of its parents) is gone
pub fn is_missing_target(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENOTDIR)
}

/// Result type alias using the merge engine's Error type
pub type Result<T> = std::result::Result<T, Error>;
