use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Errors surfaced by the document store and the value encoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A key, sequence, or offset that is not present. Read APIs recover
    /// from this locally (empty document, `None`, or `false`); it only
    /// propagates from operations that require the record to exist.
    KeyNotFound,
    /// An encoded value that cannot be decoded: unknown type code, truncated
    /// varint or payload, bad shared-string reference, invalid UTF-8.
    MalformedValue(String),
    /// An accessor called on a value of the wrong type.
    TypeMismatch(String),
    /// A failure in the underlying file: open, read, write, sync, unlink.
    IO(String),
    /// An operation issued against an object in the wrong state: a closed
    /// enumerator, a transaction whose file was deleted, a rollback past the
    /// transaction start, a dict key written outside a dict.
    StateViolation(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::MalformedValue(msg) => write!(f, "malformed value: {msg}"),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::StateViolation(msg) => write!(f, "state violation: {msg}"),
        }
    }
}

/// Constructs an Error::MalformedValue for the given format string.
#[macro_export]
macro_rules! errvalue {
    ($($args:tt)*) => { $crate::error::Error::MalformedValue(format!($($args)*)).into() };
}

/// Constructs an Error::StateViolation for the given format string.
#[macro_export]
macro_rules! errstate {
    ($($args:tt)*) => { $crate::error::Error::StateViolation(format!($($args)*)).into() };
}

/// A Result returning the crate-wide Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
