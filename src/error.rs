//! Crate-wide error type.
//!
//! Each layer (format parsing, page I/O, B-tree, WAL, crypto, transactions)
//! defines its own `thiserror::Error` enum close to where the failure can
//! occur; this module aggregates them into the one type that crosses the
//! public API boundary, tagged with the stable error kind from the spec.

use std::fmt;

/// Stable, loggable classification of a failure. Consumers match on this
/// rather than on the `Error` variant tree, which is free to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidDatabase,
    CorruptPage,
    IntegrityFailure,
    WrongPassword,
    Busy,
    Io,
    InvalidArgument,
    UseAfterRelease,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidDatabase => "invalid_database",
            ErrorKind::CorruptPage => "corrupt_page",
            ErrorKind::IntegrityFailure => "integrity_failure",
            ErrorKind::WrongPassword => "wrong_password",
            ErrorKind::Busy => "busy",
            ErrorKind::Io => "io",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::UseAfterRelease => "use_after_release",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: u32, reason: String },

    #[error("integrity failure on page {page}: {reason}")]
    IntegrityFailure { page: u32, reason: String },

    #[error("wrong password")]
    WrongPassword,

    #[error("database is busy: {0}")]
    Busy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("use after release: {0}")]
    UseAfterRelease(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidDatabase(_) => ErrorKind::InvalidDatabase,
            Error::CorruptPage { .. } => ErrorKind::CorruptPage,
            Error::IntegrityFailure { .. } => ErrorKind::IntegrityFailure,
            Error::WrongPassword => ErrorKind::WrongPassword,
            Error::Busy(_) => ErrorKind::Busy,
            Error::Io(_) => ErrorKind::Io,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::UseAfterRelease(_) => ErrorKind::UseAfterRelease,
        }
    }

    pub fn corrupt_page(page: u32, reason: impl Into<String>) -> Self {
        Error::CorruptPage {
            page,
            reason: reason.into(),
        }
    }

    pub fn integrity_failure(page: u32, reason: impl Into<String>) -> Self {
        Error::IntegrityFailure {
            page,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
