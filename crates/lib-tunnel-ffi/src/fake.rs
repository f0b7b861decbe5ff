//! In-memory tunnel library for tests.
//!
//! [`FakeTunnelApi`] answers every entry point from a script and records
//! each call in a journal. [`FakeSink`] and [`RecordingPacer`] write to the
//! same journal, so tests can assert the exact interleaving of vendor
//! calls, sink writes, flushes and pauses.

use crate::api::{TunnelApi, TunnelHandle};
use crate::lifecycle::Pacer;
use crate::logbridge::LogForwarder;
use lib_types::{Sample, Status, StreamInfo};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::{c_char, c_void, CStr, CString};
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One observable event. Tunnel handles are identified by creation order,
/// starting at 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create(String),
    SetLogger(usize),
    Open(usize),
    StartStream(usize, i32),
    StreamInfo(usize, i32),
    ReadSample(usize),
    Close(usize),
    Destroy(usize),
    FreeLogMsg(String),
    SinkWrite(Vec<u8>),
    SinkFlush,
    Pause(Duration),
}

type Journal = Rc<RefCell<Vec<Call>>>;

/// Scripted ReadSample outcome.
#[derive(Clone, Debug)]
pub enum Read {
    /// Success carrying these bytes.
    Sample(Vec<u8>),
    /// Any other status.
    Status(Status),
}

#[derive(Default)]
struct Script {
    create: VecDeque<(Status, bool)>,
    open: VecDeque<Status>,
    start_stream: VecDeque<Status>,
    stream_info: VecDeque<Status>,
    reads: VecDeque<Read>,
    open_logs: Vec<(i32, String)>,
}

struct FakeState {
    script: Script,
    info: StreamInfo,
    next_id: usize,
    logger: Option<Arc<LogForwarder>>,
}

/// Builder for [`FakeTunnelApi`]. Exhausted scripts answer with
/// [`Status::ERROR`] (and a null handle for Create).
#[derive(Default)]
pub struct FakeBuilder {
    script: Script,
    info: StreamInfo,
}

impl FakeBuilder {
    /// Create results that come with a handle.
    pub fn create(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.script.create.extend(statuses.into_iter().map(|s| (s, true)));
        self
    }

    /// Create results that leave the handle null.
    pub fn create_null(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.script.create.extend(statuses.into_iter().map(|s| (s, false)));
        self
    }

    pub fn open(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.script.open.extend(statuses);
        self
    }

    pub fn start_stream(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.script.start_stream.extend(statuses);
        self
    }

    pub fn stream_info(mut self, statuses: impl IntoIterator<Item = Status>) -> Self {
        self.script.stream_info.extend(statuses);
        self
    }

    pub fn reads(mut self, reads: impl IntoIterator<Item = Read>) -> Self {
        self.script.reads.extend(reads);
        self
    }

    /// Metadata returned by successful GetStreamInfo calls.
    pub fn info(mut self, info: StreamInfo) -> Self {
        self.info = info;
        self
    }

    /// Log a message through the installed logger on every Open.
    pub fn log_on_open(mut self, level: i32, msg: impl Into<String>) -> Self {
        self.script.open_logs.push((level, msg.into()));
        self
    }

    pub fn build(self) -> FakeTunnelApi {
        FakeTunnelApi {
            state: RefCell::new(FakeState {
                script: self.script,
                info: self.info,
                next_id: 0,
                logger: None,
            }),
            journal: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

/// Scripted, recording stand-in for a vendor tunnel library.
pub struct FakeTunnelApi {
    state: RefCell<FakeState>,
    journal: Journal,
}

impl FakeTunnelApi {
    pub fn builder() -> FakeBuilder {
        FakeBuilder::default()
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.journal.borrow().clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.journal.borrow().iter().filter(|c| pred(c)).count()
    }

    /// A sink recording into this fake's journal.
    pub fn sink(&self) -> FakeSink {
        FakeSink {
            journal: Rc::clone(&self.journal),
            fail_writes: false,
        }
    }

    /// A sink whose writes fail with `BrokenPipe`.
    pub fn broken_sink(&self) -> FakeSink {
        FakeSink {
            journal: Rc::clone(&self.journal),
            fail_writes: true,
        }
    }

    /// A pacer recording into this fake's journal.
    pub fn pacer(&self) -> RecordingPacer {
        RecordingPacer {
            journal: Rc::clone(&self.journal),
        }
    }

    fn record(&self, call: Call) {
        self.journal.borrow_mut().push(call);
    }
}

fn handle_for(id: usize) -> Option<TunnelHandle> {
    TunnelHandle::from_raw((id * 0x10) as *mut c_void)
}

fn id_of(tunnel: TunnelHandle) -> usize {
    tunnel.addr() / 0x10
}

impl TunnelApi for FakeTunnelApi {
    fn create(&self, camera_url: &CStr) -> (Status, Option<TunnelHandle>) {
        self.record(Call::Create(camera_url.to_string_lossy().into_owned()));
        let mut state = self.state.borrow_mut();
        match state.script.create.pop_front() {
            Some((status, true)) => {
                state.next_id += 1;
                (status, handle_for(state.next_id))
            }
            Some((status, false)) => (status, None),
            None => (Status::ERROR, None),
        }
    }

    fn set_logger(&self, tunnel: TunnelHandle, forwarder: Arc<LogForwarder>) {
        self.record(Call::SetLogger(id_of(tunnel)));
        self.state.borrow_mut().logger = Some(forwarder);
    }

    fn open(&self, tunnel: TunnelHandle) -> Status {
        self.record(Call::Open(id_of(tunnel)));
        let (status, logger, logs) = {
            let mut state = self.state.borrow_mut();
            let status = state.script.open.pop_front().unwrap_or(Status::ERROR);
            (status, state.logger.clone(), state.script.open_logs.clone())
        };

        if let Some(logger) = logger {
            for (level, text) in logs {
                let msg = CString::new(text).expect("log text without NUL").into_raw();
                // SAFETY: msg came from CString::into_raw and is released once
                unsafe {
                    logger.deliver(level, msg, |m| self.free_log_msg(m));
                }
            }
        }
        status
    }

    fn start_stream(&self, tunnel: TunnelHandle, stream_type: i32) -> Status {
        self.record(Call::StartStream(id_of(tunnel), stream_type));
        self.state
            .borrow_mut()
            .script
            .start_stream
            .pop_front()
            .unwrap_or(Status::ERROR)
    }

    fn stream_info(&self, tunnel: TunnelHandle, index: i32) -> Result<StreamInfo, Status> {
        self.record(Call::StreamInfo(id_of(tunnel), index));
        let mut state = self.state.borrow_mut();
        match state.script.stream_info.pop_front().unwrap_or(Status::ERROR) {
            status if status.is_success() => Ok(state.info),
            status => Err(status),
        }
    }

    fn read_sample(&self, tunnel: TunnelHandle, sample: &mut Sample) -> Status {
        self.record(Call::ReadSample(id_of(tunnel)));
        match self.state.borrow_mut().script.reads.pop_front() {
            Some(Read::Sample(bytes)) => {
                sample.fill(&bytes);
                Status::SUCCESS
            }
            Some(Read::Status(status)) => status,
            None => Status::ERROR,
        }
    }

    fn close(&self, tunnel: TunnelHandle) {
        self.record(Call::Close(id_of(tunnel)));
    }

    fn destroy(&self, tunnel: TunnelHandle) {
        self.record(Call::Destroy(id_of(tunnel)));
        self.state.borrow_mut().logger = None;
    }

    unsafe fn free_log_msg(&self, msg: *const c_char) {
        // SAFETY: every message this fake hands out comes from CString::into_raw
        let text = unsafe { CString::from_raw(msg as *mut c_char) };
        self.record(Call::FreeLogMsg(text.to_string_lossy().into_owned()));
    }
}

/// Output sink recording writes and flushes.
pub struct FakeSink {
    journal: Journal,
    fail_writes: bool,
}

impl Write for FakeSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.journal.borrow_mut().push(Call::SinkWrite(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.journal.borrow_mut().push(Call::SinkFlush);
        Ok(())
    }
}

/// [`Pacer`] that records instead of sleeping.
#[derive(Default)]
pub struct RecordingPacer {
    journal: Journal,
}

impl RecordingPacer {
    /// Intervals paused so far.
    pub fn pauses(&self) -> Vec<Duration> {
        self.journal
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Pause(d) => Some(*d),
                _ => None,
            })
            .collect()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&mut self, interval: Duration) {
        self.journal.borrow_mut().push(Call::Pause(interval));
    }
}

/// Thread-safe in-memory writer, usable as a [`LogForwarder`] target.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
