//! Typed adapter over a [`NativeUsb`] backend.
//!
//! Pure pass-through: each method makes exactly one native call and turns its
//! status into a `Result`. No retries, no state beyond the shutdown latch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::native::{NativeUsb, RawDeviceInfo};
use crate::record::{DeviceRecord, SessionHandle};
use crate::status::{ErrorKind, check_status};

/// Most records one scan will request.
pub const MAX_SCAN_CAPACITY: usize = 256;

/// Largest length a single read will request.
pub const MAX_READ_LEN: usize = 64 * 1024;

/// Scan failed at the transport level. Zero devices is not a scan error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanError {
    pub kind: ErrorKind,
}

impl ScanError {
    /// Raw status code reported by the transport.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device scan failed: {}", self.kind)
    }
}

impl std::error::Error for ScanError {}

pub struct Transport<N: NativeUsb> {
    native: N,
    shut_down: AtomicBool,
}

impl<N: NativeUsb> Transport<N> {
    pub fn new(native: N) -> Self {
        Self {
            native,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The wrapped backend.
    pub fn native(&self) -> &N {
        &self.native
    }

    /// Optional one-time setup. Skipping it is never an error.
    pub fn initialize(&self) -> Result<(), ErrorKind> {
        check_status(self.native.init()).map(|_| ())
    }

    /// Request up to `capacity` records (at most [`MAX_SCAN_CAPACITY`]).
    /// Fewer (including none) is success.
    pub fn scan(&self, capacity: usize) -> Result<Vec<DeviceRecord>, ScanError> {
        if capacity == 0 {
            return Err(ScanError {
                kind: ErrorKind::InvalidArgument,
            });
        }
        if capacity > MAX_SCAN_CAPACITY {
            log::debug!("scan capacity {capacity} capped at {MAX_SCAN_CAPACITY}");
        }
        let capacity = capacity.min(MAX_SCAN_CAPACITY);
        let mut raw = vec![RawDeviceInfo::EMPTY; capacity];
        let found = check_status(self.native.scan_device(&mut raw))
            .map_err(|kind| ScanError { kind })?;
        let found = (found as usize).min(capacity);
        Ok(raw[..found].iter().map(DeviceRecord::from_raw).collect())
    }

    pub fn open(&self, handle: &SessionHandle) -> Result<(), ErrorKind> {
        check_status(self.native.open_device(handle.as_raw())).map(|_| ())
    }

    /// Read into `buf[..max_len]`, clamped to the buffer and to
    /// [`MAX_READ_LEN`]. `Ok(0)` means no data was available.
    pub fn read(
        &self,
        handle: &SessionHandle,
        buf: &mut [u8],
        max_len: usize,
    ) -> Result<usize, ErrorKind> {
        let len = max_len.min(buf.len()).min(MAX_READ_LEN);
        let n = check_status(self.native.read_data(handle.as_raw(), &mut buf[..len]))?;
        Ok((n as usize).min(len))
    }

    /// Close `handle`. Closing something that is not open is tolerated.
    pub fn close(&self, handle: &SessionHandle) -> Result<(), ErrorKind> {
        match check_status(self.native.close_device(handle.as_raw())) {
            Ok(_) => Ok(()),
            Err(ErrorKind::NotFound) => {
                log::debug!("close of {handle}: not open, ignoring");
                Ok(())
            }
            Err(kind) => Err(kind),
        }
    }

    /// Release process-wide transport resources. Only the first call reaches
    /// the backend; returns whether this call did.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::debug!("transport shutdown");
        self.native.cleanup();
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
