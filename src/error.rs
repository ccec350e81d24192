//! Error types for snapshot operations
//!
//! A single error enum covers the whole engine. Recoverable conditions
//! (unreadable subtrees, stale caches, failed existence queries) are handled
//! in place and never surface here; everything in this enum aborts the
//! operation that raised it.

use std::fmt;
use std::io;

/// Result type for hoard operations
pub type Result<T> = std::result::Result<T, HoardError>;

/// Errors raised by the snapshot engine and its stores
#[derive(Debug)]
pub enum HoardError {
    /// Filesystem I/O failure
    Io(io::Error),

    /// External encoder/decoder failure: nonzero exit, timeout, or a
    /// program that could not be spawned
    Subprocess {
        program: String,
        exit: Option<i32>,
        stderr: String,
    },

    /// Version file carries an unknown format tag
    UnsupportedFormat(String),

    /// A TSV row is missing a required column or a typed cell failed to parse
    MalformedRow { line: usize, reason: String },

    /// An index entry failed validation before being written
    InvalidIndex(String),

    /// Attempt to store a version under a reserved name
    ReservedName(String),

    /// Block store operation failed
    BlockStore(String),

    /// Version store operation failed
    VersionStore(String),

    /// Configuration file is malformed or the working tree is missing
    Config(String),

    /// The operation was cancelled before completion
    Cancelled,
}

impl fmt::Display for HoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoardError::Io(e) => write!(f, "I/O error: {}", e),
            HoardError::Subprocess {
                program,
                exit,
                stderr,
            } => match exit {
                Some(code) => {
                    write!(f, "{} exited with status {}: {}", program, code, stderr.trim())
                }
                None => write!(f, "{} did not complete: {}", program, stderr.trim()),
            },
            HoardError::UnsupportedFormat(tag) => {
                write!(f, "Unsupported version file format: {}", tag)
            }
            HoardError::MalformedRow { line, reason } => {
                write!(f, "Malformed row at line {}: {}", line, reason)
            }
            HoardError::InvalidIndex(reason) => write!(f, "Invalid index entry: {}", reason),
            HoardError::ReservedName(name) => {
                write!(f, "The name {:?} is reserved within an archive", name)
            }
            HoardError::BlockStore(reason) => write!(f, "Block store error: {}", reason),
            HoardError::VersionStore(reason) => write!(f, "Version store error: {}", reason),
            HoardError::Config(reason) => write!(f, "Configuration error: {}", reason),
            HoardError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for HoardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HoardError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HoardError {
    fn from(err: io::Error) -> Self {
        HoardError::Io(err)
    }
}

impl From<walkdir::Error> for HoardError {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io_err) => HoardError::Io(io_err),
            None => HoardError::Io(io::Error::other("walk loop detected")),
        }
    }
}
