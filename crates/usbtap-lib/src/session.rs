//! Session lifecycle: scan, select, open, read, close.
//!
//! [`SessionManager`] owns the state machine for one device at a time.
//! [`SessionManager::with_session`] is the only way to open a session: it
//! hands the body an [`OpenSession`] that lives for the duration of the call
//! and closes the device on every way out of it, unwinding included.
//!
//! A second `with_session` while a session is open fails with
//! [`SessionError::AlreadyOpen`] without touching the transport.

use std::cell::Cell;
use std::fmt;

use crate::finalizer::Finalizer;
use crate::native::NativeUsb;
use crate::record::{DeviceRecord, SessionHandle};
use crate::select::{SelectionError, select_device};
use crate::status::ErrorKind;
use crate::transport::{ScanError, Transport};

// ── State machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Scanning,
    Selected,
    Opening,
    Open,
    Reading,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Failed) => self != Closed,
            (Idle | Closed | Failed, Scanning) => true,
            (Scanning, Selected) => true,
            (Idle | Selected | Closed | Failed, Opening) => true,
            (Opening, Open) => true,
            (Open, Reading) | (Reading, Open) => true,
            (Open | Reading | Failed, Closing) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Selected => "selected",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Reading => "reading",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ── Error type ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    OpenFailed(ErrorKind),
    /// A session is already open; the transport was not called.
    AlreadyOpen,
    /// Close failed. Reported, never raised over a teardown.
    CloseFailed(ErrorKind),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::OpenFailed(kind) => write!(f, "failed to open device: {kind}"),
            SessionError::AlreadyOpen => write!(f, "a device session is already open"),
            SessionError::CloseFailed(kind) => write!(f, "failed to close device: {kind}"),
        }
    }
}

impl std::error::Error for SessionError {}

// ── Manager ──

pub struct SessionManager<'t, N: NativeUsb> {
    transport: &'t Transport<N>,
    state: Cell<SessionState>,
    current: Cell<Option<SessionHandle>>,
    /// Fatal read error seen in the current session.
    fault: Cell<Option<ErrorKind>>,
    close_error: Cell<Option<ErrorKind>>,
    finalizer: Option<Finalizer>,
}

impl<'t, N: NativeUsb> SessionManager<'t, N> {
    pub fn new(transport: &'t Transport<N>) -> Self {
        Self {
            transport,
            state: Cell::new(SessionState::Idle),
            current: Cell::new(None),
            fault: Cell::new(None),
            close_error: Cell::new(None),
            finalizer: None,
        }
    }

    /// Keep `finalizer` armed with the open handle while a session is live.
    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn transport(&self) -> &'t Transport<N> {
        self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Handle of the open session, if any.
    pub fn current(&self) -> Option<SessionHandle> {
        self.current.get()
    }

    pub fn is_open(&self) -> bool {
        self.current.get().is_some()
    }

    /// Take the error from the most recent failed close, if any.
    pub fn take_close_error(&self) -> Option<SessionError> {
        self.close_error.take().map(SessionError::CloseFailed)
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.replace(next);
        if prev.allows(next) {
            log::debug!("session: {prev} -> {next}");
        } else {
            log::warn!("session: unexpected transition {prev} -> {next}");
        }
    }

    /// Scan for devices. An empty snapshot is returned as `Ok`, but leaves
    /// the manager `Failed` since there is nothing to select.
    pub fn scan(&self, capacity: usize) -> Result<Vec<DeviceRecord>, ScanError> {
        self.transition(SessionState::Scanning);
        match self.transport.scan(capacity) {
            Ok(records) => {
                log::debug!("scan found {} device(s)", records.len());
                if records.is_empty() {
                    self.transition(SessionState::Failed);
                }
                Ok(records)
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    pub fn select<'r>(
        &self,
        records: &'r [DeviceRecord],
        target: Option<&str>,
    ) -> Result<&'r DeviceRecord, SelectionError> {
        match select_device(records, target) {
            Ok(record) => {
                if self.state.get() == SessionState::Scanning {
                    self.transition(SessionState::Selected);
                }
                Ok(record)
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    /// Open `handle`, run `body`, close.
    ///
    /// Close runs exactly once after a successful open, whatever `body` does.
    /// If the finalizer already released the session, it is not closed again.
    /// If open fails, close is not called. A close failure is logged and kept
    /// for [`take_close_error`](Self::take_close_error); it does not replace
    /// the body's result.
    pub fn with_session<T>(
        &self,
        handle: SessionHandle,
        body: impl FnOnce(&OpenSession<'_, N>) -> T,
    ) -> Result<T, SessionError> {
        if let Some(open) = self.current.get() {
            log::warn!("refusing to open {handle}: {open} is still open");
            return Err(SessionError::AlreadyOpen);
        }

        self.transition(SessionState::Opening);
        if let Err(kind) = self.transport.open(&handle) {
            log::debug!("open {handle} failed: {kind}");
            self.transition(SessionState::Failed);
            return Err(SessionError::OpenFailed(kind));
        }

        self.current.set(Some(handle));
        self.fault.set(None);
        self.close_error.set(None);
        if let Some(finalizer) = &self.finalizer {
            finalizer.arm(handle);
        }
        self.transition(SessionState::Open);

        let _guard = CloseGuard {
            manager: self,
            handle,
        };
        let session = OpenSession {
            manager: self,
            handle,
        };
        Ok(body(&session))
    }

    fn close(&self, handle: SessionHandle) {
        self.transition(SessionState::Closing);
        let released = self
            .finalizer
            .as_ref()
            .is_some_and(|f| f.released() == Some(handle));
        let result = if released {
            log::debug!("{handle} already released by the finalizer");
            Ok(())
        } else {
            self.transport.close(&handle)
        };
        self.current.set(None);
        if let Some(finalizer) = &self.finalizer {
            finalizer.disarm();
        }
        if let Err(kind) = result {
            log::warn!("closing {handle} failed: {kind}");
            self.close_error.set(Some(kind));
        }
        self.transition(SessionState::Closed);
    }
}

/// Closes the session when `with_session` returns or unwinds.
struct CloseGuard<'a, 't, N: NativeUsb> {
    manager: &'a SessionManager<'t, N>,
    handle: SessionHandle,
}

impl<N: NativeUsb> Drop for CloseGuard<'_, '_, N> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::warn!("session body panicked, closing {}", self.handle);
        }
        self.manager.close(self.handle);
    }
}

// ── Open session ──

/// Borrowed view of the open session, valid inside `with_session` only.
pub struct OpenSession<'a, N: NativeUsb> {
    manager: &'a SessionManager<'a, N>,
    handle: SessionHandle,
}

impl<N: NativeUsb> OpenSession<'_, N> {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    /// One transport read into `buf[..max_len]`.
    ///
    /// A fatal error moves the session to `Failed`; later reads return the
    /// same error without calling the transport.
    pub fn read(&self, buf: &mut [u8], max_len: usize) -> Result<usize, ErrorKind> {
        if let Some(kind) = self.manager.fault.get() {
            return Err(kind);
        }
        self.manager.transition(SessionState::Reading);
        match self.manager.transport.read(&self.handle, buf, max_len) {
            Ok(n) => {
                self.manager.transition(SessionState::Open);
                Ok(n)
            }
            Err(kind) if kind.is_recoverable() => {
                self.manager.transition(SessionState::Open);
                Err(kind)
            }
            Err(kind) => {
                self.fail(kind);
                Err(kind)
            }
        }
    }

    /// Mark the session failed; it will still be closed on scope exit.
    pub fn fail(&self, kind: ErrorKind) {
        self.manager.fault.set(Some(kind));
        if self.manager.state() != SessionState::Failed {
            self.manager.transition(SessionState::Failed);
        }
    }

    /// The fatal error that failed this session, if any.
    pub fn fault(&self) -> Option<ErrorKind> {
        self.manager.fault.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::mock::{Call, MockNative, ReadStep};
    use crate::status::*;

    fn handle(s: &str) -> SessionHandle {
        SessionHandle::from_serial(s).unwrap()
    }

    fn opens(t: &Transport<MockNative>) -> usize {
        t.native().count(|c| matches!(c, Call::Open(_)))
    }

    fn closes(t: &Transport<MockNative>) -> usize {
        t.native().count(|c| matches!(c, Call::Close(_)))
    }

    #[test]
    fn body_result_is_returned_and_closed() {
        let t = Transport::new(MockNative::new());
        let m = SessionManager::new(&t);
        let out = m.with_session(handle("SN"), |s| s.handle().to_string());
        assert_eq!(out, Ok("SN".to_string()));
        assert_eq!(m.state(), SessionState::Closed);
        assert!(!m.is_open());
        assert_eq!(
            t.native().calls(),
            vec![Call::Open("SN".into()), Call::Close("SN".into())]
        );
    }

    #[test]
    fn nested_open_is_refused() {
        let t = Transport::new(MockNative::new());
        let m = SessionManager::new(&t);
        let inner = m
            .with_session(handle("SN"), |_| m.with_session(handle("SN"), |_| ()))
            .unwrap();
        assert_eq!(inner, Err(SessionError::AlreadyOpen));
        assert_eq!(opens(&t), 1);
        assert_eq!(closes(&t), 1);
    }

    #[test]
    fn open_failure_skips_close() {
        let mock = MockNative::new();
        mock.open_status.set(STATUS_ACCESS);
        let t = Transport::new(mock);
        let m = SessionManager::new(&t);
        let mut ran = false;
        let out = m.with_session(handle("SN"), |_| ran = true);
        assert_eq!(out, Err(SessionError::OpenFailed(ErrorKind::AccessDenied)));
        assert!(!ran);
        assert_eq!(closes(&t), 0);
        assert_eq!(m.state(), SessionState::Failed);
    }

    #[test]
    fn failing_body_still_closes() {
        let t = Transport::new(MockNative::new());
        let m = SessionManager::new(&t);
        let out: Result<Result<(), &str>, _> = m.with_session(handle("SN"), |_| Err("boom"));
        assert_eq!(out, Ok(Err("boom")));
        assert_eq!(closes(&t), 1);
    }

    #[test]
    fn panicking_body_still_closes() {
        let t = Transport::new(MockNative::new());
        let m = SessionManager::new(&t);
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            m.with_session(handle("SN"), |_| panic!("body blew up"))
        }));
        assert!(caught.is_err());
        assert_eq!(closes(&t), 1);
        assert!(!m.is_open());
    }

    #[test]
    fn close_failure_is_kept_not_raised() {
        let mock = MockNative::new();
        mock.close_status.set(STATUS_IO);
        let t = Transport::new(mock);
        let m = SessionManager::new(&t);
        assert_eq!(m.with_session(handle("SN"), |_| 5), Ok(5));
        assert_eq!(
            m.take_close_error(),
            Some(SessionError::CloseFailed(ErrorKind::IoError))
        );
        assert_eq!(m.take_close_error(), None);
    }

    #[test]
    fn sequential_sessions_are_allowed() {
        let t = Transport::new(MockNative::new());
        let m = SessionManager::new(&t);
        assert!(m.with_session(handle("A"), |_| ()).is_ok());
        assert!(m.with_session(handle("B"), |_| ()).is_ok());
        assert_eq!(opens(&t), 2);
        assert_eq!(closes(&t), 2);
    }

    #[test]
    fn fatal_read_fails_session_and_sticks() {
        let mock = MockNative::new();
        mock.push_read(ReadStep::Status(STATUS_PIPE));
        mock.push_read(ReadStep::Data(vec![1]));
        let t = Transport::new(mock);
        let m = SessionManager::new(&t);
        m.with_session(handle("SN"), |s| {
            let mut buf = [0u8; 4];
            assert_eq!(s.read(&mut buf, 4), Err(ErrorKind::PipeError));
            assert_eq!(s.state(), SessionState::Failed);
            assert_eq!(s.read(&mut buf, 4), Err(ErrorKind::PipeError));
            assert_eq!(s.fault(), Some(ErrorKind::PipeError));
        })
        .unwrap();
        assert_eq!(t.native().count(|c| matches!(c, Call::Read(..))), 1);
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn recoverable_read_returns_to_open() {
        let mock = MockNative::new();
        mock.push_read(ReadStep::Status(STATUS_TIMEOUT));
        let t = Transport::new(mock);
        let m = SessionManager::new(&t);
        m.with_session(handle("SN"), |s| {
            let mut buf = [0u8; 4];
            assert_eq!(s.read(&mut buf, 4), Err(ErrorKind::Timeout));
            assert_eq!(s.state(), SessionState::Open);
        })
        .unwrap();
    }

    #[test]
    fn finalizer_is_armed_only_while_open() {
        let t = Transport::new(MockNative::new());
        let f = Finalizer::new();
        let m = SessionManager::new(&t).with_finalizer(f.clone());
        m.with_session(handle("SN"), |_| {
            assert_eq!(f.armed(), Some(handle("SN")));
        })
        .unwrap();
        assert_eq!(f.armed(), None);
    }

    #[test]
    fn scan_and_select_drive_state() {
        let t = Transport::new(MockNative::with_serials(&["AAA", "BBB"]));
        let m = SessionManager::new(&t);
        let records = m.scan(10).unwrap();
        assert_eq!(m.state(), SessionState::Scanning);
        let picked = m.select(&records, Some("BBB")).unwrap();
        assert_eq!(m.state(), SessionState::Selected);
        m.with_session(picked.session_handle(), |s| {
            assert_eq!(s.state(), SessionState::Open);
        })
        .unwrap();
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn empty_scan_leaves_manager_failed() {
        let t = Transport::new(MockNative::new());
        let m = SessionManager::new(&t);
        assert!(m.scan(10).unwrap().is_empty());
        assert_eq!(m.state(), SessionState::Failed);
    }

    #[test]
    fn transition_table() {
        use SessionState::*;
        assert!(Idle.allows(Scanning));
        assert!(Scanning.allows(Selected));
        assert!(Selected.allows(Opening));
        assert!(Opening.allows(Open));
        assert!(Open.allows(Reading));
        assert!(Reading.allows(Open));
        assert!(Failed.allows(Closing));
        assert!(Closing.allows(Closed));
        assert!(Reading.allows(Failed));
        assert!(!Closed.allows(Failed));
        assert!(!Idle.allows(Reading));
        assert!(!Closed.allows(Open));
    }
}
