//! Unified error type for the usbtap-lib crate.
//!
//! [`UsbtapError`] wraps the per-stage errors (scan, selection, session,
//! read) plus I/O and configuration problems. `From` impls let
//! `?` carry any of them across module boundaries.

use std::fmt;

use crate::read_loop::ReadError;
use crate::select::SelectionError;
use crate::session::SessionError;
use crate::status::ErrorKind;
use crate::transport::ScanError;

#[derive(Debug)]
pub enum UsbtapError {
    /// The transport's optional initialize step was called and failed.
    Init(ErrorKind),
    Scan(ScanError),
    Selection(SelectionError),
    Session(SessionError),
    Read(ReadError),
    /// Standard I/O error (writing the config file).
    Io(std::io::Error),
    /// Configuration problem.
    Config(String),
}

impl fmt::Display for UsbtapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbtapError::Init(kind) => write!(f, "transport initialization failed: {kind}"),
            UsbtapError::Scan(e) => write!(f, "{e}"),
            UsbtapError::Selection(e) => write!(f, "{e}"),
            UsbtapError::Session(e) => write!(f, "{e}"),
            UsbtapError::Read(e) => write!(f, "{e}"),
            UsbtapError::Io(e) => write!(f, "I/O error: {e}"),
            UsbtapError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for UsbtapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UsbtapError::Init(kind) => Some(kind),
            UsbtapError::Scan(e) => Some(e),
            UsbtapError::Selection(e) => Some(e),
            UsbtapError::Session(e) => Some(e),
            UsbtapError::Read(e) => Some(e),
            UsbtapError::Io(e) => Some(e),
            UsbtapError::Config(_) => None,
        }
    }
}

impl From<ScanError> for UsbtapError {
    fn from(e: ScanError) -> Self {
        UsbtapError::Scan(e)
    }
}

impl From<SelectionError> for UsbtapError {
    fn from(e: SelectionError) -> Self {
        UsbtapError::Selection(e)
    }
}

impl From<SessionError> for UsbtapError {
    fn from(e: SessionError) -> Self {
        UsbtapError::Session(e)
    }
}

impl From<ReadError> for UsbtapError {
    fn from(e: ReadError) -> Self {
        UsbtapError::Read(e)
    }
}

impl From<std::io::Error> for UsbtapError {
    fn from(e: std::io::Error) -> Self {
        UsbtapError::Io(e)
    }
}

/// Crate-level Result alias using [`UsbtapError`].
pub type Result<T> = std::result::Result<T, UsbtapError>;
