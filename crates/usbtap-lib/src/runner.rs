//! One complete run: initialize, scan, select, open, read, close, shut down.
//!
//! Every way of using the tool (a single snapshot, a short poll, a timed
//! stream) is the same flow with a different [`RunPlan`]. Progress is
//! reported through a [`RunObserver`]; the outcome comes back as a
//! [`RunReport`] whose [`exit_code`](RunReport::exit_code) tells the stages
//! apart.

use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, UsbtapError};
use crate::native::NativeUsb;
use crate::read_loop::{ReadBuffer, ReadOutcome, ReadPlan, ReadSeries, read_series};
use crate::record::{DeviceRecord, SessionHandle};
use crate::session::{SessionError, SessionManager};
use crate::transport::Transport;

pub const EXIT_OK: i32 = 0;
/// No devices, or none with the requested serial.
pub const EXIT_NO_DEVICE: i32 = 1;
/// Open failed (including "already open").
pub const EXIT_OPEN_FAILED: i32 = 2;
/// A fatal read error ended the read loop.
pub const EXIT_READ_FAILED: i32 = 3;
/// Initialize or scan failed at the transport level.
pub const EXIT_TRANSPORT_FAILED: i32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub scan_capacity: usize,
    /// Serial to select; `None` takes the first device.
    pub target: Option<String>,
    pub initialize: bool,
    /// Pause between open and the first read.
    pub settle: Duration,
    pub read: ReadPlan,
}

impl RunPlan {
    pub fn from_config(config: &Config) -> Self {
        let mut read = ReadPlan::new(
            config.read_size,
            config.read_count,
            Duration::from_millis(config.read_interval_ms),
        );
        if config.deadline_ms > 0 {
            read = read.with_deadline(Duration::from_millis(config.deadline_ms));
        }
        RunPlan {
            scan_capacity: config.scan_capacity,
            target: config.target_serial().map(str::to_string),
            initialize: config.initialize,
            settle: Duration::from_millis(config.settle_ms),
            read,
        }
    }
}

/// Progress callbacks. Every method defaults to doing nothing.
pub trait RunObserver {
    fn on_scan(&mut self, _records: &[DeviceRecord]) {}
    fn on_selected(&mut self, _record: &DeviceRecord) {}
    fn on_opened(&mut self, _handle: &SessionHandle) {}
    fn on_read(&mut self, _index: u32, _outcome: &ReadOutcome, _data: &[u8]) {}
    /// Called after a session that was opened has been closed.
    fn on_closed(&mut self, _close_error: Option<&SessionError>) {}
}

impl RunObserver for () {}

#[derive(Debug, Default)]
pub struct RunReport {
    pub devices: Vec<DeviceRecord>,
    pub selected: Option<DeviceRecord>,
    pub series: Option<ReadSeries>,
    /// What ended the run early, if anything.
    pub error: Option<UsbtapError>,
    /// Close failure, reported but not treated as a run failure.
    pub close_error: Option<SessionError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        match &self.error {
            None => EXIT_OK,
            Some(UsbtapError::Selection(_)) => EXIT_NO_DEVICE,
            Some(UsbtapError::Session(_)) => EXIT_OPEN_FAILED,
            Some(UsbtapError::Read(_)) => EXIT_READ_FAILED,
            Some(_) => EXIT_TRANSPORT_FAILED,
        }
    }
}

/// Shuts the transport down when dropped, including during unwinding.
struct ShutdownGuard<'t, N: NativeUsb>(&'t Transport<N>);

impl<N: NativeUsb> Drop for ShutdownGuard<'_, N> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::warn!("run aborted by panic, shutting transport down");
        }
        self.0.shutdown();
    }
}

/// Execute `plan`. The transport is shut down before returning, on every path.
pub fn run<N: NativeUsb>(
    manager: &SessionManager<'_, N>,
    plan: &RunPlan,
    observer: &mut impl RunObserver,
) -> RunReport {
    let _shutdown = ShutdownGuard(manager.transport());
    let mut report = RunReport::default();
    if let Err(e) = run_stages(manager, plan, observer, &mut report) {
        log::debug!("run ended early: {e}");
        report.error = Some(e);
    }
    report
}

fn run_stages<N: NativeUsb>(
    manager: &SessionManager<'_, N>,
    plan: &RunPlan,
    observer: &mut impl RunObserver,
    report: &mut RunReport,
) -> Result<()> {
    if plan.initialize {
        manager
            .transport()
            .initialize()
            .map_err(UsbtapError::Init)?;
    }

    report.devices = manager.scan(plan.scan_capacity)?;
    observer.on_scan(&report.devices);

    let selected = manager
        .select(&report.devices, plan.target.as_deref())?
        .clone();
    observer.on_selected(&selected);
    let handle = selected.session_handle();
    report.selected = Some(selected);

    let series = manager.with_session(handle, |session| {
        observer.on_opened(session.handle());
        if !plan.settle.is_zero() {
            log::debug!("settling for {:?}", plan.settle);
            thread::sleep(plan.settle);
        }
        let mut buffer = ReadBuffer::new(plan.read.max_len);
        read_series(session, &mut buffer, &plan.read, |i, outcome, data| {
            observer.on_read(i, outcome, data)
        })
    })?;

    report.close_error = manager.take_close_error();
    observer.on_closed(report.close_error.as_ref());

    let halted_by = series.halted_by;
    report.series = Some(series);
    match halted_by {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
