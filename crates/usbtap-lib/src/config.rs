//! Tool configuration: TOML file, platform-aware path, and run presets.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::FixedText;
use crate::transport::{MAX_READ_LEN, MAX_SCAN_CAPACITY};

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str = "# usbtap configuration\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// USB vendor ID the scan filters on.
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    /// USB product ID the scan filters on.
    #[serde(default = "default_product_id")]
    pub product_id: u16,

    /// Interface claimed on open.
    #[serde(default)]
    pub interface: u8,

    /// Interrupt IN endpoint polled while a device is open.
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,

    /// Bytes requested per interrupt transfer.
    #[serde(default = "default_transfer_size")]
    pub transfer_size: usize,

    /// Maximum records returned by one scan.
    #[serde(default = "default_scan_capacity")]
    pub scan_capacity: usize,

    /// Serial of the device to open. Empty = first device found.
    #[serde(default)]
    pub device_serial: String,

    /// Read buffer size, and the per-read length limit.
    #[serde(default = "default_read_size")]
    pub read_size: usize,

    /// Number of reads per run.
    #[serde(default = "default_read_count")]
    pub read_count: u32,

    /// Pause between reads, in milliseconds.
    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,

    /// Pause between open and the first read, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Stop reading after this many milliseconds. 0 = no limit.
    #[serde(default)]
    pub deadline_ms: u64,

    /// Call the transport's optional initialize step before scanning.
    #[serde(default = "default_true")]
    pub initialize: bool,
}

fn default_vendor_id() -> u16 {
    0x1733
}
fn default_product_id() -> u16 {
    0xAABB
}
fn default_endpoint() -> u8 {
    0x81
}
fn default_transfer_size() -> usize {
    64
}
fn default_scan_capacity() -> usize {
    10
}
fn default_read_size() -> usize {
    1024
}
fn default_read_count() -> u32 {
    1
}
fn default_read_interval_ms() -> u64 {
    1
}
fn default_settle_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            interface: 0,
            endpoint: default_endpoint(),
            transfer_size: default_transfer_size(),
            scan_capacity: default_scan_capacity(),
            device_serial: String::new(),
            read_size: default_read_size(),
            read_count: default_read_count(),
            read_interval_ms: default_read_interval_ms(),
            settle_ms: default_settle_ms(),
            deadline_ms: 0,
            initialize: true,
        }
    }
}

/// Problems [`Config::validate`] can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    ZeroScanCapacity,
    ScanCapacityTooLarge(usize),
    ZeroReadSize,
    ReadSizeTooLarge(usize),
    ZeroReadCount,
    ZeroTransferSize,
    TransferSizeTooLarge(usize),
    /// `endpoint` lacks the IN direction bit (0x80).
    EndpointNotIn(u8),
    /// `device_serial` can't be sent to the transport.
    InvalidSerial(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroScanCapacity => write!(f, "scan_capacity must be at least 1"),
            ValidationError::ScanCapacityTooLarge(n) => {
                write!(f, "scan_capacity {n} exceeds {MAX_SCAN_CAPACITY}")
            }
            ValidationError::ZeroReadSize => write!(f, "read_size must be at least 1"),
            ValidationError::ReadSizeTooLarge(n) => {
                write!(f, "read_size {n} exceeds {MAX_READ_LEN}")
            }
            ValidationError::ZeroReadCount => write!(f, "read_count must be at least 1"),
            ValidationError::ZeroTransferSize => write!(f, "transfer_size must be at least 1"),
            ValidationError::TransferSizeTooLarge(n) => {
                write!(f, "transfer_size {n} exceeds {MAX_READ_LEN}")
            }
            ValidationError::EndpointNotIn(ep) => {
                write!(f, "endpoint 0x{ep:02X} is not an IN endpoint")
            }
            ValidationError::InvalidSerial(e) => write!(f, "invalid device_serial: {e}"),
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("usbtap"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Load config from `path`.
    ///
    /// A missing file gives `(defaults, [])`; an unparseable one gives
    /// `(defaults, [warning])`.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Save to `path` atomically (temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // rename fails across filesystems
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Save to the default platform path.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config directory",
            ));
        };
        self.save_to(&path)
    }

    /// Target serial, or `None` when any device will do.
    pub fn target_serial(&self) -> Option<&str> {
        let s = self.device_serial.trim();
        (!s.is_empty()).then_some(s)
    }

    /// Check every field, collecting all problems.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = check_scan_capacity(self.scan_capacity) {
            errors.push(e);
        }
        if self.read_size == 0 {
            errors.push(ValidationError::ZeroReadSize);
        } else if self.read_size > MAX_READ_LEN {
            errors.push(ValidationError::ReadSizeTooLarge(self.read_size));
        }
        if self.read_count == 0 {
            errors.push(ValidationError::ZeroReadCount);
        }
        if self.transfer_size == 0 {
            errors.push(ValidationError::ZeroTransferSize);
        } else if self.transfer_size > MAX_READ_LEN {
            errors.push(ValidationError::TransferSizeTooLarge(self.transfer_size));
        }
        if self.endpoint & 0x80 == 0 {
            errors.push(ValidationError::EndpointNotIn(self.endpoint));
        }
        if let Some(serial) = self.target_serial()
            && let Err(e) = FixedText::encode(serial)
        {
            errors.push(ValidationError::InvalidSerial(e.to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Range check for a scan capacity, whether from the file or a flag.
pub fn check_scan_capacity(capacity: usize) -> std::result::Result<(), ValidationError> {
    match capacity {
        0 => Err(ValidationError::ZeroScanCapacity),
        n if n > MAX_SCAN_CAPACITY => Err(ValidationError::ScanCapacityTooLarge(n)),
        _ => Ok(()),
    }
}

// ── Presets ──

/// Canned read plans for the common ways of using the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// One large read after letting the device settle.
    Snapshot,
    /// A handful of small reads a second apart.
    Poll,
    /// Continuous small reads for a fixed time.
    Stream,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Snapshot, Preset::Poll, Preset::Stream];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Snapshot => "snapshot",
            Preset::Poll => "poll",
            Preset::Stream => "stream",
        }
    }

    /// Overwrite the scan and read fields of `config`.
    pub fn apply(self, config: &mut Config) {
        match self {
            Preset::Snapshot => {
                config.scan_capacity = 10;
                config.read_size = 1024;
                config.read_count = 1;
                config.read_interval_ms = 1;
                config.settle_ms = 2000;
                config.deadline_ms = 0;
                config.initialize = true;
            }
            Preset::Poll => {
                config.scan_capacity = 16;
                config.read_size = 64;
                config.read_count = 5;
                config.read_interval_ms = 1000;
                config.settle_ms = 0;
                config.deadline_ms = 0;
                config.initialize = false;
            }
            Preset::Stream => {
                config.scan_capacity = 10;
                config.read_size = 64;
                config.read_count = 100_000;
                config.read_interval_ms = 1;
                config.settle_ms = 0;
                config.deadline_ms = 5000;
                config.initialize = true;
            }
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Preset::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown preset \"{s}\" (expected snapshot, poll or stream)"))
    }
}
