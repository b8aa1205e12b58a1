//! Error types for access decisions, configuration and guarded I/O.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Why a request path was refused.
///
/// Denials are final verdicts: callers report them verbatim and never retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The resolved path lies outside every allowed directory.
    #[error("access denied, path outside allowed directories: {0}")]
    OutsideAllowedRoots(PathBuf),
    /// The path looks like it is inside an allowed directory, but a symlink
    /// along it resolves somewhere else.
    #[error("access denied, symlink escapes allowed directories: {path} -> {target}")]
    SymlinkEscape { path: PathBuf, target: PathBuf },
    /// The path is excluded by an ignore pattern.
    #[error("access denied, path is ignored: {0}")]
    Ignored(PathBuf),
    /// The path (or every ancestor of a write target) does not exist.
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),
    /// The input is malformed or could not be resolved.
    #[error("invalid path {input:?}: {reason}")]
    InvalidInput { input: String, reason: String },
}

/// Tag of a [`Denial`], suitable for structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    OutsideAllowedRoots,
    SymlinkEscape,
    Ignored,
    NotFound,
    InvalidInput,
}

impl DenialReason {
    /// `SymlinkEscape` is a diagnostic refinement of `OutsideAllowedRoots`.
    pub fn is_outside_roots(self) -> bool {
        matches!(self, Self::OutsideAllowedRoots | Self::SymlinkEscape)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutsideAllowedRoots => "outside_allowed_roots",
            Self::SymlinkEscape => "symlink_escape",
            Self::Ignored => "ignored",
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
        }
    }
}

impl Denial {
    pub(crate) fn invalid(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> DenialReason {
        match self {
            Self::OutsideAllowedRoots(_) => DenialReason::OutsideAllowedRoots,
            Self::SymlinkEscape { .. } => DenialReason::SymlinkEscape,
            Self::Ignored(_) => DenialReason::Ignored,
            Self::NotFound(_) => DenialReason::NotFound,
            Self::InvalidInput { .. } => DenialReason::InvalidInput,
        }
    }

    /// Stable machine-readable code for this denial.
    pub fn code(&self) -> &'static str {
        self.reason().as_str()
    }
}

/// Errors raised while building the access policy at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("at least one allowed directory must be specified")]
    NoRoots,

    #[error("allowed directory does not exist or is not a directory: {0}")]
    InvalidRoot(PathBuf),

    #[error("failed to canonicalize allowed directory {path}: {source}")]
    RootIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from guarded filesystem operations.
#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Denied(#[from] Denial),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("text not found in file: {0:?}")]
    EditNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
