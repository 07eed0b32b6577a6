//! Device records and the fixed-size text fields they carry.
//!
//! The transport fills serial/manufacturer/product into 64-byte NUL-padded
//! buffers with no encoding guarantee. [`FixedText`] keeps those bytes as-is
//! and only decodes on request: text runs up to the first NUL, and any
//! non-ASCII byte in that run is a [`DecodeError`] rather than a panic.

use std::fmt;

use serde::Serialize;

use crate::native::RawDeviceInfo;

/// Capacity of every text field, terminator included.
pub const TEXT_CAPACITY: usize = 64;

// ── Error type ──

/// Text field decode/encode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte at `position` is outside the ASCII range.
    NonAscii { position: usize, byte: u8 },
    /// Text of `len` bytes does not fit with its terminator.
    TooLong { len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NonAscii { position, byte } => {
                write!(f, "non-ASCII byte 0x{byte:02X} at offset {position}")
            }
            DecodeError::TooLong { len } => write!(
                f,
                "text is {len} bytes, at most {} fit",
                TEXT_CAPACITY - 1
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

// ── FixedText ──

/// A 64-byte NUL-padded text buffer in its native representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedText([u8; TEXT_CAPACITY]);

impl FixedText {
    pub const EMPTY: FixedText = FixedText([0; TEXT_CAPACITY]);

    /// Wrap a raw buffer without interpreting it.
    pub const fn from_raw(raw: [u8; TEXT_CAPACITY]) -> Self {
        FixedText(raw)
    }

    /// Copy raw bytes into a buffer, truncating so a terminator always fits.
    pub fn from_bytes_truncated(bytes: &[u8]) -> Self {
        let mut raw = [0u8; TEXT_CAPACITY];
        let len = bytes.len().min(TEXT_CAPACITY - 1);
        raw[..len].copy_from_slice(&bytes[..len]);
        FixedText(raw)
    }

    /// Encode ASCII text into a transport-compatible buffer.
    pub fn encode(text: &str) -> Result<Self, DecodeError> {
        let bytes = text.as_bytes();
        if let Some(position) = bytes.iter().position(|b| !b.is_ascii() || *b == 0) {
            return Err(DecodeError::NonAscii {
                position,
                byte: bytes[position],
            });
        }
        if bytes.len() >= TEXT_CAPACITY {
            return Err(DecodeError::TooLong { len: bytes.len() });
        }
        Ok(Self::from_bytes_truncated(bytes))
    }

    pub fn as_raw(&self) -> &[u8; TEXT_CAPACITY] {
        &self.0
    }

    /// Bytes before the first NUL. The last byte is reserved for the
    /// terminator, so an unterminated buffer yields at most 63 bytes.
    pub fn text_bytes(&self) -> &[u8] {
        let max = TEXT_CAPACITY - 1;
        let end = self.0[..max].iter().position(|&b| b == 0).unwrap_or(max);
        &self.0[..end]
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// Decode as ASCII, stopping at the first NUL.
    pub fn decode(&self) -> Result<String, DecodeError> {
        let text = self.text_bytes();
        if let Some(position) = text.iter().position(|b| !b.is_ascii()) {
            return Err(DecodeError::NonAscii {
                position,
                byte: text[position],
            });
        }
        Ok(text.iter().map(|&b| b as char).collect())
    }

    /// Decode for display, substituting undecodable bytes.
    pub fn decode_lossy(&self) -> String {
        String::from_utf8_lossy(self.text_bytes()).into_owned()
    }
}

impl Default for FixedText {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for FixedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedText({:?})", self.decode_lossy())
    }
}

// ── Session handle ──

/// Identity token for open/read/close: the device serial buffer, verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(FixedText);

impl SessionHandle {
    pub fn new(serial: FixedText) -> Self {
        SessionHandle(serial)
    }

    /// Build a handle from user-supplied serial text.
    pub fn from_serial(serial: &str) -> Result<Self, DecodeError> {
        FixedText::encode(serial.trim()).map(SessionHandle)
    }

    pub fn as_raw(&self) -> &[u8; TEXT_CAPACITY] {
        self.0.as_raw()
    }

    pub fn serial(&self) -> &FixedText {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.decode_lossy())
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionHandle({:?})", self.0.decode_lossy())
    }
}

// ── Device record ──

/// One device as reported by a scan. Never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: FixedText,
    pub bus_number: u8,
    pub device_address: u8,
    pub manufacturer: Option<FixedText>,
    pub product: Option<FixedText>,
}

impl DeviceRecord {
    /// Lift a raw record. Empty manufacturer/product fields become `None`.
    pub fn from_raw(raw: &RawDeviceInfo) -> Self {
        let optional = |bytes: [u8; TEXT_CAPACITY]| {
            let text = FixedText::from_raw(bytes);
            (!text.is_empty()).then_some(text)
        };
        DeviceRecord {
            vendor_id: raw.vid,
            product_id: raw.pid,
            serial_number: FixedText::from_raw(raw.serial),
            bus_number: raw.bus,
            device_address: raw.address,
            manufacturer: optional(raw.manufacturer),
            product: optional(raw.product),
        }
    }

    pub fn serial(&self) -> Result<String, DecodeError> {
        self.serial_number.decode()
    }

    pub fn session_handle(&self) -> SessionHandle {
        SessionHandle::new(self.serial_number)
    }

    /// Display-friendly view with lossily decoded text.
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            vendor_id: format!("0x{:04X}", self.vendor_id),
            product_id: format!("0x{:04X}", self.product_id),
            serial: self.serial_number.decode_lossy(),
            manufacturer: self.manufacturer.as_ref().map(FixedText::decode_lossy),
            product: self.product.as_ref().map(FixedText::decode_lossy),
            bus: self.bus_number,
            address: self.device_address,
            text_valid: self.text_problems().is_empty(),
        }
    }

    /// Fields that failed strict decoding, with the reason.
    pub fn text_problems(&self) -> Vec<(&'static str, DecodeError)> {
        let mut problems = Vec::new();
        if let Err(e) = self.serial_number.decode() {
            problems.push(("serial", e));
        }
        if let Some(Err(e)) = self.manufacturer.as_ref().map(FixedText::decode) {
            problems.push(("manufacturer", e));
        }
        if let Some(Err(e)) = self.product.as_ref().map(FixedText::decode) {
            problems.push(("product", e));
        }
        problems
    }
}

/// Serializable, human-facing projection of a [`DeviceRecord`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub vendor_id: String,
    pub product_id: String,
    pub serial: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub bus: u8,
    pub address: u8,
    /// False when a text field held non-ASCII bytes.
    pub text_valid: bool,
}
