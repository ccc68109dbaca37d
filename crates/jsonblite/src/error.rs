//! Error surface of the engine.
//!
//! Four kinds reach callers: `InvalidKey`, `CorruptFile`, `LockFailure` and
//! `Io`. A journal that fails to decode during recovery is handled
//! internally (logged and treated as absent) and never surfaces.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Keys must be non-empty strings.
    #[error("invalid key: keys must be non-empty strings")]
    InvalidKey,

    /// Header magic/version mismatch, declared regions exceeding the real
    /// file, or an index region that does not decode as a map.
    #[error("corrupt database file: {0}")]
    CorruptFile(String),

    /// An advisory lock acquire or release failed.
    #[error("file lock failed: {0}")]
    LockFailure(#[source] io::Error),

    /// Any lower-level read/write/open/rename failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<format::FormatError> for Error {
    fn from(e: format::FormatError) -> Self {
        match e {
            format::FormatError::IndexEncode(msg) => {
                Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
            }
            other => Error::CorruptFile(other.to_string()),
        }
    }
}

impl From<journal::JournalError> for Error {
    fn from(e: journal::JournalError) -> Self {
        match e {
            journal::JournalError::Io(e) => Error::Io(e),
            journal::JournalError::Corrupt(msg) => Error::CorruptFile(msg),
            journal::JournalError::Encode(msg) => {
                Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
            }
        }
    }
}
