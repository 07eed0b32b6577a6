//! Bounded polling reads against an open session.
//!
//! [`read_series`] makes exactly one transport read per iteration and sleeps
//! between iterations. Recoverable errors are recorded and the loop moves on;
//! the first fatal error is recorded and ends the loop.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::native::NativeUsb;
use crate::session::OpenSession;
use crate::status::ErrorKind;
use crate::transport::MAX_READ_LEN;

// ── Buffer ──

/// Fixed-capacity buffer reused across reads. Each read overwrites it; the
/// valid length is the count returned by the most recent read.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    data: Vec<u8>,
    len: usize,
}

impl ReadBuffer {
    /// Buffer of `capacity` bytes, capped at [`MAX_READ_LEN`].
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.min(MAX_READ_LEN)],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes from the most recent read.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// One read from `session` into this buffer. A failed read leaves the
    /// buffer empty.
    pub fn read_from<N: NativeUsb>(
        &mut self,
        session: &OpenSession<'_, N>,
        max_len: usize,
    ) -> Result<usize, ErrorKind> {
        let result = session.read(&mut self.data, max_len);
        self.len = *result.as_ref().unwrap_or(&0);
        result
    }
}

// ── Plan and outcomes ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    /// Per-read length limit, clamped to the buffer capacity.
    pub max_len: usize,
    /// Total read attempts.
    pub iterations: u32,
    pub inter_read_delay: Duration,
    /// Stop starting new reads once this much time has passed.
    pub deadline: Option<Duration>,
}

impl ReadPlan {
    pub fn new(max_len: usize, iterations: u32, inter_read_delay: Duration) -> Self {
        Self {
            max_len,
            iterations,
            inter_read_delay,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOutcome {
    Data(usize),
    /// Zero bytes: nothing available right now.
    Empty,
    Error(ErrorKind),
}

impl ReadOutcome {
    pub fn from_result(result: Result<usize, ErrorKind>) -> Self {
        match result {
            Ok(0) => ReadOutcome::Empty,
            Ok(n) => ReadOutcome::Data(n),
            Err(kind) => ReadOutcome::Error(kind),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ReadOutcome::Error(kind) if !kind.is_recoverable())
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::Data(n) => write!(f, "{n} bytes"),
            ReadOutcome::Empty => write!(f, "no data"),
            ReadOutcome::Error(kind) => write!(f, "error: {kind}"),
        }
    }
}

/// A read failure with its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadError {
    pub kind: ErrorKind,
    pub recoverable: bool,
}

impl From<ErrorKind> for ReadError {
    fn from(kind: ErrorKind) -> Self {
        ReadError {
            kind,
            recoverable: kind.is_recoverable(),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read failed: {}", self.kind)
    }
}

impl std::error::Error for ReadError {}

/// Everything a read loop produced, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSeries {
    pub outcomes: Vec<ReadOutcome>,
    pub bytes_total: usize,
    /// The fatal error that ended the loop early.
    pub halted_by: Option<ReadError>,
    /// The loop stopped because the plan's deadline passed.
    pub deadline_hit: bool,
}

impl ReadSeries {
    pub fn data_reads(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ReadOutcome::Data(_)))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ReadOutcome::Error(_)))
            .count()
    }
}

// ── Loop ──

/// Run `plan` against `session`, reporting each outcome (with the bytes read)
/// to `on_outcome` as it happens.
pub fn read_series<N: NativeUsb>(
    session: &OpenSession<'_, N>,
    buffer: &mut ReadBuffer,
    plan: &ReadPlan,
    mut on_outcome: impl FnMut(u32, &ReadOutcome, &[u8]),
) -> ReadSeries {
    let started = Instant::now();
    let past_deadline = || plan.deadline.is_some_and(|d| started.elapsed() >= d);
    let mut series = ReadSeries::default();

    for i in 0..plan.iterations {
        if i > 0 {
            if past_deadline() {
                series.deadline_hit = true;
                break;
            }
            thread::sleep(plan.inter_read_delay);
            if past_deadline() {
                series.deadline_hit = true;
                break;
            }
        }

        let outcome = ReadOutcome::from_result(buffer.read_from(session, plan.max_len));
        on_outcome(i, &outcome, buffer.as_slice());
        series.outcomes.push(outcome);

        match outcome {
            ReadOutcome::Data(n) => series.bytes_total += n,
            ReadOutcome::Error(kind) if !kind.is_recoverable() => {
                log::debug!("read {} of {}: {kind}, stopping", i + 1, plan.iterations);
                series.halted_by = Some(ReadError::from(kind));
                break;
            }
            ReadOutcome::Error(kind) => log::debug!("read {}: {kind}, continuing", i + 1),
            ReadOutcome::Empty => {}
        }
    }

    if series.deadline_hit {
        log::debug!("read deadline reached after {} reads", series.outcomes.len());
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::mock::{Call, MockNative, ReadStep};
    use crate::record::SessionHandle;
    use crate::session::{SessionManager, SessionState};
    use crate::status::*;
    use crate::transport::Transport;

    fn run(mock: MockNative, plan: &ReadPlan, capacity: usize) -> (ReadSeries, Transport<MockNative>) {
        let t = Transport::new(mock);
        let series = {
            let m = SessionManager::new(&t);
            let handle = SessionHandle::from_serial("SN").unwrap();
            m.with_session(handle, |s| {
                let mut buf = ReadBuffer::new(capacity);
                read_series(s, &mut buf, plan, |_, _, _| {})
            })
            .unwrap()
        };
        (series, t)
    }

    fn plan(iterations: u32) -> ReadPlan {
        ReadPlan::new(64, iterations, Duration::ZERO)
    }

    #[test]
    fn outcome_from_result() {
        assert_eq!(ReadOutcome::from_result(Ok(0)), ReadOutcome::Empty);
        assert_eq!(ReadOutcome::from_result(Ok(3)), ReadOutcome::Data(3));
        assert_eq!(
            ReadOutcome::from_result(Err(ErrorKind::Busy)),
            ReadOutcome::Error(ErrorKind::Busy)
        );
        assert!(ReadOutcome::Error(ErrorKind::NotFound).is_fatal());
        assert!(!ReadOutcome::Error(ErrorKind::Interrupted).is_fatal());
        assert!(!ReadOutcome::Empty.is_fatal());
    }

    #[test]
    fn recoverable_errors_continue_fatal_stops() {
        let mock = MockNative::new();
        for step in [
            ReadStep::Status(STATUS_TIMEOUT),
            ReadStep::Status(STATUS_TIMEOUT),
            ReadStep::Data(vec![0xAB; 10]),
            ReadStep::Status(STATUS_ACCESS),
            ReadStep::Data(vec![1; 5]),
        ] {
            mock.push_read(step);
        }
        let (series, t) = run(mock, &plan(10), 64);
        assert_eq!(
            series.outcomes,
            vec![
                ReadOutcome::Error(ErrorKind::Timeout),
                ReadOutcome::Error(ErrorKind::Timeout),
                ReadOutcome::Data(10),
                ReadOutcome::Error(ErrorKind::AccessDenied),
            ]
        );
        assert_eq!(
            series.halted_by,
            Some(ReadError {
                kind: ErrorKind::AccessDenied,
                recoverable: false
            })
        );
        assert_eq!(series.bytes_total, 10);
        assert_eq!(t.native().pending_reads().len(), 1);
        assert_eq!(t.native().count(|c| matches!(c, Call::Close(_))), 1);
    }

    #[test]
    fn runs_full_budget_when_nothing_fatal() {
        let mock = MockNative::new();
        mock.push_read(ReadStep::Data(vec![1, 2]));
        mock.push_read(ReadStep::Status(STATUS_BUSY));
        let (series, _) = run(mock, &plan(4), 64);
        assert_eq!(
            series.outcomes,
            vec![
                ReadOutcome::Data(2),
                ReadOutcome::Error(ErrorKind::Busy),
                ReadOutcome::Empty,
                ReadOutcome::Empty,
            ]
        );
        assert_eq!(series.halted_by, None);
        assert_eq!(series.data_reads(), 1);
        assert_eq!(series.error_count(), 1);
    }

    #[test]
    fn unknown_status_is_fatal() {
        let mock = MockNative::new();
        mock.push_read(ReadStep::Status(-42));
        let (series, _) = run(mock, &plan(5), 64);
        assert_eq!(series.outcomes, vec![ReadOutcome::Error(ErrorKind::Unknown(-42))]);
    }

    #[test]
    fn buffer_holds_only_latest_read() {
        let t = Transport::new(MockNative::new());
        t.native().push_read(ReadStep::Data(vec![9; 6]));
        t.native().push_read(ReadStep::Data(vec![4; 2]));
        t.native().push_read(ReadStep::Status(STATUS_TIMEOUT));
        let m = SessionManager::new(&t);
        m.with_session(SessionHandle::from_serial("SN").unwrap(), |s| {
            let mut buf = ReadBuffer::new(8);
            assert_eq!(buf.read_from(s, 8), Ok(6));
            assert_eq!(buf.as_slice(), &[9; 6]);
            assert_eq!(buf.read_from(s, 8), Ok(2));
            assert_eq!(buf.as_slice(), &[4, 4]);
            assert_eq!(buf.read_from(s, 8), Err(ErrorKind::Timeout));
            assert!(buf.is_empty());
            assert_eq!(buf.capacity(), 8);
        })
        .unwrap();
    }

    #[test]
    fn callback_sees_each_outcome_with_bytes() {
        let t = Transport::new(MockNative::new());
        t.native().push_read(ReadStep::Data(vec![1, 2, 3]));
        t.native().push_read(ReadStep::Status(STATUS_PIPE));
        let m = SessionManager::new(&t);
        let mut seen = Vec::new();
        m.with_session(SessionHandle::from_serial("SN").unwrap(), |s| {
            let mut buf = ReadBuffer::new(16);
            read_series(s, &mut buf, &plan(3), |i, o, bytes| {
                seen.push((i, *o, bytes.to_vec()));
            });
            assert_eq!(s.state(), SessionState::Failed);
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                (0, ReadOutcome::Data(3), vec![1, 2, 3]),
                (1, ReadOutcome::Error(ErrorKind::PipeError), vec![]),
            ]
        );
    }

    #[test]
    fn max_len_limits_each_read() {
        let mock = MockNative::new();
        mock.push_read(ReadStep::Data(vec![0; 100]));
        let plan = ReadPlan::new(16, 1, Duration::ZERO);
        let (series, t) = run(mock, &plan, 64);
        assert_eq!(series.outcomes, vec![ReadOutcome::Data(16)]);
        assert!(t.native().calls().contains(&Call::Read("SN".into(), 16)));
    }

    #[test]
    fn zero_deadline_allows_only_first_read() {
        let plan = plan(10).with_deadline(Duration::ZERO);
        let (series, _) = run(MockNative::new(), &plan, 64);
        assert_eq!(series.outcomes.len(), 1);
        assert!(series.deadline_hit);
    }

    #[test]
    fn buffer_capacity_is_capped() {
        assert_eq!(ReadBuffer::new(usize::MAX).capacity(), MAX_READ_LEN);
        assert_eq!(ReadBuffer::new(16).capacity(), 16);
    }

    #[test]
    fn zero_iterations_reads_nothing() {
        let (series, t) = run(MockNative::new(), &plan(0), 64);
        assert!(series.outcomes.is_empty());
        assert_eq!(t.native().count(|c| matches!(c, Call::Read(..))), 0);
    }

    #[test]
    fn outcomes_serialize_snake_case() {
        let json = serde_json::to_string(&vec![
            ReadOutcome::Data(4),
            ReadOutcome::Empty,
            ReadOutcome::Error(ErrorKind::Timeout),
        ])
        .unwrap();
        assert_eq!(json, r#"[{"data":4},"empty",{"error":"timeout"}]"#);
    }
}
