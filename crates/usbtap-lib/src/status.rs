//! Transport status codes and their classification.
//!
//! Every native call reports through a signed status: non-negative values are
//! success (or a count), negative values are one of the codes below. Codes we
//! don't recognise are kept verbatim in [`ErrorKind::Unknown`] and treated as
//! fatal so a read loop never spins on a failure nobody anticipated.

use std::fmt;

use serde::Serialize;

// ── Status codes ──

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_NOT_FOUND: i32 = -1;
pub const STATUS_ACCESS: i32 = -2;
pub const STATUS_IO: i32 = -3;
pub const STATUS_INVALID: i32 = -4;
pub const STATUS_BUSY: i32 = -5;
pub const STATUS_TIMEOUT: i32 = -6;
pub const STATUS_OVERFLOW: i32 = -7;
pub const STATUS_PIPE: i32 = -8;
pub const STATUS_INTERRUPTED: i32 = -9;
pub const STATUS_NO_MEM: i32 = -10;
pub const STATUS_NOT_SUPPORTED: i32 = -11;

/// Closed set of transport failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    IoError,
    InvalidArgument,
    Busy,
    Timeout,
    Overflow,
    PipeError,
    Interrupted,
    OutOfMemory,
    NotSupported,
    Unknown(i32),
}

impl ErrorKind {
    /// Classify a status code. Returns `None` for success (any non-negative value).
    pub fn from_status(code: i32) -> Option<Self> {
        let kind = match code {
            c if c >= 0 => return None,
            STATUS_NOT_FOUND => ErrorKind::NotFound,
            STATUS_ACCESS => ErrorKind::AccessDenied,
            STATUS_IO => ErrorKind::IoError,
            STATUS_INVALID => ErrorKind::InvalidArgument,
            STATUS_BUSY => ErrorKind::Busy,
            STATUS_TIMEOUT => ErrorKind::Timeout,
            STATUS_OVERFLOW => ErrorKind::Overflow,
            STATUS_PIPE => ErrorKind::PipeError,
            STATUS_INTERRUPTED => ErrorKind::Interrupted,
            STATUS_NO_MEM => ErrorKind::OutOfMemory,
            STATUS_NOT_SUPPORTED => ErrorKind::NotSupported,
            other => ErrorKind::Unknown(other),
        };
        Some(kind)
    }

    /// The status code this kind was classified from.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::NotFound => STATUS_NOT_FOUND,
            ErrorKind::AccessDenied => STATUS_ACCESS,
            ErrorKind::IoError => STATUS_IO,
            ErrorKind::InvalidArgument => STATUS_INVALID,
            ErrorKind::Busy => STATUS_BUSY,
            ErrorKind::Timeout => STATUS_TIMEOUT,
            ErrorKind::Overflow => STATUS_OVERFLOW,
            ErrorKind::PipeError => STATUS_PIPE,
            ErrorKind::Interrupted => STATUS_INTERRUPTED,
            ErrorKind::OutOfMemory => STATUS_NO_MEM,
            ErrorKind::NotSupported => STATUS_NOT_SUPPORTED,
            ErrorKind::Unknown(code) => code,
        }
    }

    /// Transient conditions after which the same call may succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Busy | ErrorKind::Timeout | ErrorKind::Interrupted
        )
    }

    /// Short human-readable description.
    pub fn describe(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "device not found",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::IoError => "I/O error",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Busy => "device busy",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Overflow => "overflow",
            ErrorKind::PipeError => "pipe error",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::Unknown(_) => "unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unknown(code) => write!(f, "unknown error (status {code})"),
            other => f.write_str(other.describe()),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Convert a raw status into a count, or the classified failure.
pub fn check_status(code: i32) -> Result<u32, ErrorKind> {
    match ErrorKind::from_status(code) {
        Some(kind) => Err(kind),
        None => Ok(code as u32),
    }
}
