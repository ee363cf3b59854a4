//! Error types for the interpreter.
//!
//! Two recoverable taxonomies exist: read errors (malformed input) and
//! runtime errors (arity mismatches, type errors, unbound reads, division by
//! zero, user-raised errors). Both unwind to the top-level evaluation loop.
//! Internal invariant breaches and heap exhaustion are panics, not errors.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed surface syntax, reported by the tokenizer or parser.
    Read(String),
    /// A failure raised while analyzing or evaluating a form.
    Runtime(String),
}

impl Error {
    pub fn read(msg: impl Into<String>) -> Error {
        Error::Read(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Error {
        Error::Runtime(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Read(msg) => write!(f, "read error: {}", msg),
            Error::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type JetResult<T> = Result<T, Error>;
