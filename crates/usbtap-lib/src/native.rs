//! Native USB call surface: raw record layout, trait and backends.
//!
//! [`NativeUsb`] mirrors the six primitives of the host transport with the
//! exact C-style shape: every call returns an `i32` status (count or negative
//! error code, see [`crate::status`]), records are filled into caller-owned
//! [`RawDeviceInfo`] slots, and identities are 64-byte serial buffers.
//! No policy lives here; [`crate::transport::Transport`] adds the types.

use std::io;

use crate::record::TEXT_CAPACITY;
use crate::status::*;

// ── Raw record ──

/// Native device record layout (extended variant with manufacturer/product).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub serial: [u8; TEXT_CAPACITY],
    pub bus: u8,
    pub address: u8,
    pub manufacturer: [u8; TEXT_CAPACITY],
    pub product: [u8; TEXT_CAPACITY],
}

impl RawDeviceInfo {
    pub const EMPTY: RawDeviceInfo = RawDeviceInfo {
        vid: 0,
        pid: 0,
        serial: [0; TEXT_CAPACITY],
        bus: 0,
        address: 0,
        manufacturer: [0; TEXT_CAPACITY],
        product: [0; TEXT_CAPACITY],
    };
}

impl Default for RawDeviceInfo {
    fn default() -> Self {
        Self::EMPTY
    }
}

// ── Trait ──

pub trait NativeUsb {
    /// Optional one-time setup. Backends that need none keep the default.
    fn init(&self) -> i32 {
        STATUS_SUCCESS
    }
    /// Fill up to `devices.len()` records; returns the count or an error status.
    fn scan_device(&self, devices: &mut [RawDeviceInfo]) -> i32;
    fn open_device(&self, serial: &[u8; TEXT_CAPACITY]) -> i32;
    /// Copy available bytes into `data`; returns the byte count or an error status.
    fn read_data(&self, serial: &[u8; TEXT_CAPACITY], data: &mut [u8]) -> i32;
    fn close_device(&self, serial: &[u8; TEXT_CAPACITY]) -> i32;
    fn cleanup(&self);
}

/// Map an OS-level I/O error onto a transport status code.
pub fn status_from_io(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::NotFound => STATUS_NOT_FOUND,
        io::ErrorKind::PermissionDenied => STATUS_ACCESS,
        io::ErrorKind::InvalidInput => STATUS_INVALID,
        io::ErrorKind::ResourceBusy => STATUS_BUSY,
        io::ErrorKind::TimedOut => STATUS_TIMEOUT,
        io::ErrorKind::BrokenPipe => STATUS_PIPE,
        io::ErrorKind::Interrupted => STATUS_INTERRUPTED,
        io::ErrorKind::OutOfMemory => STATUS_NO_MEM,
        io::ErrorKind::Unsupported => STATUS_NOT_SUPPORTED,
        _ => STATUS_IO,
    }
}

/// Which devices a hardware backend reports, and how it talks to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    /// Interrupt IN endpoint address.
    pub endpoint: u8,
    /// Size of each interrupt transfer request.
    pub transfer_size: usize,
}

impl UsbFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && product_id == self.product_id
    }
}

impl From<&crate::config::Config> for UsbFilter {
    fn from(config: &crate::config::Config) -> Self {
        UsbFilter {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            interface: config.interface,
            endpoint: config.endpoint,
            transfer_size: config.transfer_size,
        }
    }
}

// ── nusb implementation ──

#[cfg(any(target_os = "linux", windows, target_os = "macos"))]
mod nusb_impl {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::thread::JoinHandle;
    use std::time::Duration;

    use futures::channel::oneshot;
    use futures::executor::block_on;
    use futures::future::{self, Either};
    use nusb::transfer::{RequestBuffer, TransferError};

    use crate::record::FixedText;
    use crate::ring::RingBuffer;

    /// Interrupt transfers kept in flight by the reader thread.
    const IN_FLIGHT: usize = 2;

    /// Pause after a failed transfer before resubmitting.
    const RESUBMIT_DELAY: Duration = Duration::from_millis(10);

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The one device currently claimed, plus its reader thread.
    struct ActiveDevice {
        serial: [u8; TEXT_CAPACITY],
        ring: Arc<Mutex<RingBuffer>>,
        /// Negative status once the reader has stopped for good.
        fault: Arc<AtomicI32>,
        stop: Option<oneshot::Sender<()>>,
        reader: Option<JoinHandle<()>>,
    }

    impl ActiveDevice {
        fn stop(mut self) {
            if let Some(tx) = self.stop.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.reader.take()
                && handle.join().is_err()
            {
                log::warn!("USB reader thread panicked");
            }
            let dropped = lock(&self.ring).dropped();
            if dropped > 0 {
                log::warn!("receive buffer overflowed, {dropped} bytes lost this session");
            }
        }
    }

    pub struct NusbNative {
        filter: UsbFilter,
        active: Mutex<Option<ActiveDevice>>,
    }

    impl NusbNative {
        pub fn new(filter: UsbFilter) -> Self {
            Self {
                filter,
                active: Mutex::new(None),
            }
        }

        fn raw_from_info(info: &nusb::DeviceInfo) -> RawDeviceInfo {
            let text = |s: Option<&str>| {
                *FixedText::from_bytes_truncated(s.unwrap_or_default().as_bytes()).as_raw()
            };
            RawDeviceInfo {
                vid: info.vendor_id(),
                pid: info.product_id(),
                serial: text(info.serial_number()),
                bus: info.bus_number(),
                address: info.device_address(),
                manufacturer: text(info.manufacturer_string()),
                product: text(info.product_string()),
            }
        }

        fn matching_devices(
            &self,
        ) -> std::result::Result<impl Iterator<Item = nusb::DeviceInfo>, i32> {
            let filter = self.filter;
            nusb::list_devices()
                .map(|list| list.filter(move |d| filter.matches(d.vendor_id(), d.product_id())))
                .map_err(|e| {
                    log::debug!("USB enumeration failed: {e}");
                    status_from_io(&e)
                })
        }

        fn open_inner(&self, serial: &[u8; TEXT_CAPACITY]) -> std::result::Result<ActiveDevice, i32> {
            let info = self
                .matching_devices()?
                .find(|d| &Self::raw_from_info(d).serial == serial)
                .ok_or(STATUS_NOT_FOUND)?;

            let device = info.open().map_err(|e| {
                log::debug!("USB open failed: {e}");
                status_from_io(&e)
            })?;
            let interface = device.claim_interface(self.filter.interface).map_err(|e| {
                log::debug!("claim interface {} failed: {e}", self.filter.interface);
                status_from_io(&e)
            })?;

            let ring = Arc::new(Mutex::new(RingBuffer::default()));
            let fault = Arc::new(AtomicI32::new(STATUS_SUCCESS));
            let (stop_tx, stop_rx) = oneshot::channel();

            let reader = {
                let ring = Arc::clone(&ring);
                let fault = Arc::clone(&fault);
                let endpoint = self.filter.endpoint;
                let size = self.filter.transfer_size;
                std::thread::Builder::new()
                    .name("usbtap-reader".into())
                    .spawn(move || reader_loop(interface, endpoint, size, ring, fault, stop_rx))
                    .map_err(|e| status_from_io(&e))?
            };

            log::debug!(
                "opened {:04x}:{:04x} at bus {} address {}",
                info.vendor_id(),
                info.product_id(),
                info.bus_number(),
                info.device_address()
            );

            Ok(ActiveDevice {
                serial: *serial,
                ring,
                fault,
                stop: Some(stop_tx),
                reader: Some(reader),
            })
        }
    }

    /// Keep interrupt IN transfers in flight and append completed data to `ring`.
    fn reader_loop(
        interface: nusb::Interface,
        endpoint: u8,
        transfer_size: usize,
        ring: Arc<Mutex<RingBuffer>>,
        fault: Arc<AtomicI32>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut queue = interface.interrupt_in_queue(endpoint);
        for _ in 0..IN_FLIGHT {
            queue.submit(RequestBuffer::new(transfer_size));
        }

        loop {
            let completion = match block_on(future::select(queue.next_complete(), &mut stop)) {
                Either::Left((completion, _)) => completion,
                Either::Right(_) => break,
            };
            match completion.status {
                Ok(()) => {
                    let stored = lock(&ring).push(&completion.data);
                    if stored < completion.data.len() {
                        log::debug!(
                            "receive buffer full, dropped {} bytes",
                            completion.data.len() - stored
                        );
                    }
                }
                Err(TransferError::Cancelled) => break,
                Err(TransferError::Disconnected) => {
                    fault.store(STATUS_NOT_FOUND, Ordering::Release);
                    break;
                }
                Err(e) => {
                    log::debug!("interrupt transfer on 0x{endpoint:02x} failed: {e}");
                    std::thread::sleep(RESUBMIT_DELAY);
                }
            }
            queue.submit(RequestBuffer::reuse(completion.data, transfer_size));
        }
    }

    impl NativeUsb for NusbNative {
        fn scan_device(&self, devices: &mut [RawDeviceInfo]) -> i32 {
            if devices.is_empty() {
                return STATUS_INVALID;
            }
            let list = match self.matching_devices() {
                Ok(list) => list,
                Err(status) => return status,
            };
            let mut found = 0;
            for (slot, info) in devices.iter_mut().zip(list) {
                *slot = Self::raw_from_info(&info);
                found += 1;
            }
            found
        }

        fn open_device(&self, serial: &[u8; TEXT_CAPACITY]) -> i32 {
            let mut active = lock(&self.active);
            if active.is_some() {
                return STATUS_BUSY;
            }
            match self.open_inner(serial) {
                Ok(dev) => {
                    *active = Some(dev);
                    STATUS_SUCCESS
                }
                Err(status) => status,
            }
        }

        fn read_data(&self, serial: &[u8; TEXT_CAPACITY], data: &mut [u8]) -> i32 {
            if data.is_empty() {
                return STATUS_INVALID;
            }
            let active = lock(&self.active);
            let Some(dev) = active.as_ref().filter(|d| &d.serial == serial) else {
                return STATUS_NOT_FOUND;
            };
            let n = lock(&dev.ring).drain_into(data);
            if n == 0 {
                let fault = dev.fault.load(Ordering::Acquire);
                if fault < 0 {
                    return fault;
                }
            }
            n.min(i32::MAX as usize) as i32
        }

        fn close_device(&self, serial: &[u8; TEXT_CAPACITY]) -> i32 {
            let dev = {
                let mut active = lock(&self.active);
                match active.as_ref() {
                    Some(d) if &d.serial == serial => active.take(),
                    _ => None,
                }
            };
            match dev {
                Some(dev) => {
                    dev.stop();
                    STATUS_SUCCESS
                }
                None => STATUS_NOT_FOUND,
            }
        }

        fn cleanup(&self) {
            let dev = lock(&self.active).take();
            if let Some(dev) = dev {
                log::debug!("cleanup: releasing device left open");
                dev.stop();
            }
        }
    }
}

#[cfg(any(target_os = "linux", windows, target_os = "macos"))]
pub use nusb_impl::NusbNative;

// ── Stub for unsupported platforms ──

/// Backend that finds nothing. Keeps the crate building and testable on
/// hosts `nusb` doesn't support.
#[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
pub struct StubNative;

#[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
impl StubNative {
    pub fn new(_filter: UsbFilter) -> Self {
        StubNative
    }
}

#[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
impl NativeUsb for StubNative {
    fn scan_device(&self, _devices: &mut [RawDeviceInfo]) -> i32 {
        0
    }
    fn open_device(&self, _serial: &[u8; TEXT_CAPACITY]) -> i32 {
        STATUS_NOT_SUPPORTED
    }
    fn read_data(&self, _serial: &[u8; TEXT_CAPACITY], _data: &mut [u8]) -> i32 {
        STATUS_NOT_SUPPORTED
    }
    fn close_device(&self, _serial: &[u8; TEXT_CAPACITY]) -> i32 {
        STATUS_NOT_SUPPORTED
    }
    fn cleanup(&self) {}
}

/// Concrete backend for the current platform.
#[cfg(any(target_os = "linux", windows, target_os = "macos"))]
pub type PlatformNative = NusbNative;
#[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
pub type PlatformNative = StubNative;

// ── Mock backend for testing ──

/// Scripted in-memory backend for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use crate::record::FixedText;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A scripted value, settable from the test while the mock is shared.
    #[derive(Debug)]
    pub struct Setting<T>(Mutex<T>);

    impl<T: Copy> Setting<T> {
        pub fn new(value: T) -> Self {
            Setting(Mutex::new(value))
        }

        pub fn get(&self) -> T {
            *lock(&self.0)
        }

        pub fn set(&self, value: T) {
            *lock(&self.0) = value;
        }
    }

    /// One scripted `read_data` result.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ReadStep {
        Data(Vec<u8>),
        Status(i32),
    }

    /// A recorded native call. Serials are decoded lossily for readability.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Init,
        Scan(usize),
        Open(String),
        Read(String, usize),
        Close(String),
        Cleanup,
    }

    pub struct MockNative {
        /// Devices reported by `scan_device`, in order.
        devices: Mutex<Vec<RawDeviceInfo>>,
        pub init_status: Setting<i32>,
        /// If set, `scan_device` returns this instead of the device list.
        pub scan_status: Setting<Option<i32>>,
        pub open_status: Setting<i32>,
        pub close_status: Setting<i32>,
        /// Pending `read_data` results; an empty queue reads 0 bytes.
        reads: Mutex<VecDeque<ReadStep>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Default for MockNative {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockNative {
        pub fn new() -> Self {
            MockNative {
                devices: Mutex::new(Vec::new()),
                init_status: Setting::new(STATUS_SUCCESS),
                scan_status: Setting::new(None),
                open_status: Setting::new(STATUS_SUCCESS),
                close_status: Setting::new(STATUS_SUCCESS),
                reads: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Mock reporting one device per serial.
        pub fn with_serials(serials: &[&str]) -> Self {
            let mock = Self::new();
            for (i, serial) in serials.iter().enumerate() {
                mock.add_device(Self::device(serial, i as u8 + 1));
            }
            mock
        }

        /// A plausible raw record for `serial`.
        pub fn device(serial: &str, address: u8) -> RawDeviceInfo {
            RawDeviceInfo {
                vid: 0x1733,
                pid: 0xAABB,
                serial: *FixedText::from_bytes_truncated(serial.as_bytes()).as_raw(),
                bus: 1,
                address,
                manufacturer: *FixedText::from_bytes_truncated(b"Mock Inc.").as_raw(),
                product: *FixedText::from_bytes_truncated(b"Mock Sensor").as_raw(),
            }
        }

        pub fn add_device(&self, record: RawDeviceInfo) {
            lock(&self.devices).push(record);
        }

        pub fn push_read(&self, step: ReadStep) {
            lock(&self.reads).push_back(step);
        }

        /// Scripted reads not consumed yet, oldest first.
        pub fn pending_reads(&self) -> Vec<ReadStep> {
            lock(&self.reads).iter().cloned().collect()
        }

        pub fn calls(&self) -> Vec<Call> {
            lock(&self.calls).clone()
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            lock(&self.calls).iter().filter(|c| pred(c)).count()
        }

        fn record(&self, call: Call) {
            lock(&self.calls).push(call);
        }

        fn name(serial: &[u8; TEXT_CAPACITY]) -> String {
            FixedText::from_raw(*serial).decode_lossy()
        }
    }

    impl NativeUsb for MockNative {
        fn init(&self) -> i32 {
            self.record(Call::Init);
            self.init_status.get()
        }

        fn scan_device(&self, devices: &mut [RawDeviceInfo]) -> i32 {
            self.record(Call::Scan(devices.len()));
            if let Some(status) = self.scan_status.get() {
                return status;
            }
            let known = lock(&self.devices);
            let n = known.len().min(devices.len());
            devices[..n].copy_from_slice(&known[..n]);
            n as i32
        }

        fn open_device(&self, serial: &[u8; TEXT_CAPACITY]) -> i32 {
            self.record(Call::Open(Self::name(serial)));
            self.open_status.get()
        }

        fn read_data(&self, serial: &[u8; TEXT_CAPACITY], data: &mut [u8]) -> i32 {
            self.record(Call::Read(Self::name(serial), data.len()));
            let step = lock(&self.reads).pop_front();
            match step {
                None => 0,
                Some(ReadStep::Status(status)) => status,
                Some(ReadStep::Data(bytes)) => {
                    let n = bytes.len().min(data.len());
                    data[..n].copy_from_slice(&bytes[..n]);
                    n as i32
                }
            }
        }

        fn close_device(&self, serial: &[u8; TEXT_CAPACITY]) -> i32 {
            self.record(Call::Close(Self::name(serial)));
            self.close_status.get()
        }

        fn cleanup(&self) {
            self.record(Call::Cleanup);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn io_errors_map_to_status_codes() {
        let cases = [
            (io::ErrorKind::NotFound, STATUS_NOT_FOUND),
            (io::ErrorKind::PermissionDenied, STATUS_ACCESS),
            (io::ErrorKind::ResourceBusy, STATUS_BUSY),
            (io::ErrorKind::TimedOut, STATUS_TIMEOUT),
            (io::ErrorKind::Unsupported, STATUS_NOT_SUPPORTED),
            (io::ErrorKind::Other, STATUS_IO),
        ];
        for (kind, status) in cases {
            assert_eq!(status_from_io(&io::Error::from(kind)), status, "{kind:?}");
        }
    }

    #[test]
    fn filter_matches_exact_ids() {
        let filter = UsbFilter {
            vendor_id: 0x1733,
            product_id: 0xAABB,
            interface: 0,
            endpoint: 0x81,
            transfer_size: 64,
        };
        assert!(filter.matches(0x1733, 0xAABB));
        assert!(!filter.matches(0x1733, 0xAABC));
        assert!(!filter.matches(0x1234, 0xAABB));
    }

    #[test]
    fn raw_record_is_c_layout_sized() {
        // 2 + 2 + 64 + 1 + 1 + 64 + 64, alignment 2
        assert_eq!(std::mem::size_of::<RawDeviceInfo>(), 198);
    }

    #[test]
    fn mock_scan_respects_capacity() {
        let mock = MockNative::with_serials(&["A", "B", "C"]);
        let mut slots = [RawDeviceInfo::EMPTY; 2];
        assert_eq!(mock.scan_device(&mut slots), 2);
        assert_eq!(&slots[1].serial[..1], b"B");
        assert_eq!(mock.calls(), vec![Call::Scan(2)]);
    }

    #[test]
    fn mock_reads_follow_script_then_go_empty() {
        let mock = MockNative::new();
        mock.push_read(ReadStep::Data(vec![1, 2, 3]));
        mock.push_read(ReadStep::Status(STATUS_TIMEOUT));
        let serial = [0u8; TEXT_CAPACITY];
        let mut buf = [0u8; 2];
        assert_eq!(mock.read_data(&serial, &mut buf), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(mock.read_data(&serial, &mut buf), STATUS_TIMEOUT);
        assert_eq!(mock.read_data(&serial, &mut buf), 0);
    }

    #[test]
    fn default_init_succeeds() {
        struct Bare;
        impl NativeUsb for Bare {
            fn scan_device(&self, _d: &mut [RawDeviceInfo]) -> i32 {
                0
            }
            fn open_device(&self, _s: &[u8; TEXT_CAPACITY]) -> i32 {
                0
            }
            fn read_data(&self, _s: &[u8; TEXT_CAPACITY], _d: &mut [u8]) -> i32 {
                0
            }
            fn close_device(&self, _s: &[u8; TEXT_CAPACITY]) -> i32 {
                0
            }
            fn cleanup(&self) {}
        }
        assert_eq!(Bare.init(), STATUS_SUCCESS);
    }
}
