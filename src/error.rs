//! Centralized error types for smsdedup.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the smsdedup library.
///
/// Every variant is fatal: a run that hits any of them stops before the
/// output document or removal log is persisted.
#[derive(Error, Debug)]
pub enum DedupError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified input file does not exist.
    #[error("Input file not found: {0}")]
    FileNotFound(PathBuf),

    /// The XML itself could not be read or written.
    #[error("XML error in '{path}': {reason}")]
    Xml { path: PathBuf, reason: String },

    /// The top-level element is not the expected message container.
    #[error("Unexpected top-level element '{tag}' in '{path}' (expected 'smses'). Is the input file malformed?")]
    UnexpectedContainer { path: PathBuf, tag: String },

    /// A direct child of the container is not a recognized record kind.
    #[error("Unexpected element '{tag}' directly under the container in '{path}'. Is the input file malformed?")]
    UnexpectedRecordKind { path: PathBuf, tag: String },

    /// More than one top-level element in a single document.
    #[error("Multiple top-level elements in '{0}'")]
    MultipleContainers(PathBuf),

    /// The document has no top-level element at all.
    #[error("No message container found in '{0}'")]
    MissingContainer(PathBuf),

    /// A record has no comparison-relevant field anywhere in its tree.
    #[error("Encountered completely empty message: {0}")]
    EmptyFingerprint(String),

    /// A value looks like SMIL markup but is not a complete document.
    #[error("This SMIL format is unique / previously unknown and not captured by the existing check. Please report: {0:?}")]
    UnknownSmilVariant(String),

    /// Resolver bookkeeping does not add up. Always a logic bug.
    #[error("Internal consistency failure: {0}")]
    Inconsistent(String),

    /// A message kind present on input vanished from the output.
    #[error("Message type '{0}' was completely lost in deduplication. This should never occur!")]
    KindLost(String),

    /// The configuration file could not be written or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, DedupError>`.
pub type Result<T> = std::result::Result<T, DedupError>;

impl DedupError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `Xml` variant from a path and any displayable parser error.
    pub fn xml(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Xml {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
