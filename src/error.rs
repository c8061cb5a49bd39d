//! Error types shared across the engine

use std::path::PathBuf;

use crate::fragment::FragmentKind;

/// Fatal problems detected while activating an engine session
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot create cache directory {path:?}: {source}")]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no cache directory configured and none could be determined for this platform")]
    NoCacheDir,

    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Recoverable artifact cache failures
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A position looked like a fragment but could not be parsed as one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated {kind} starting at offset {offset}")]
    Unterminated { kind: FragmentKind, offset: usize },

    #[error("invalid {kind} span {begin}..{end} (content {begin_content}..{end_content})")]
    InvalidSpan {
        kind: FragmentKind,
        begin: usize,
        begin_content: usize,
        end_content: usize,
        end: usize,
    },
}

/// Why an external render did not produce an artifact.
///
/// Carried into the `Error` fragment state so the UI can show the failing
/// command and the full process output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{description}")]
pub struct RenderFailure {
    /// The command line that failed, suitable for copying into a shell
    pub command: String,
    /// Human-readable summary of the failure
    pub description: String,
    /// Combined stdout and stderr of every command that ran
    pub output: String,
}

impl RenderFailure {
    pub fn new(
        command: impl Into<String>,
        description: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            output: output.into(),
        }
    }
}
