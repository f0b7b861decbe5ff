//! Tunnel session lifecycle management.
//!
//! This module manages one vendor tunnel from Create to Destroy:
//! - Creation and logger installation (Bambu_Create, Bambu_SetLogger)
//! - Open and stream negotiation (Bambu_Open, Bambu_StartStreamEx, Bambu_GetStreamInfo)
//! - Sample reads (Bambu_ReadSample)
//! - Teardown (Bambu_Close, Bambu_Destroy)
//!
//! A session exists only while the vendor handle is non-null, and it issues
//! Close then Destroy exactly once, either through [`TunnelSession::close`]
//! or on drop.

use crate::api::{TunnelApi, TunnelHandle};
use crate::error::{TunnelError, TunnelResult};
use crate::logbridge::LogForwarder;
use lib_types::{Sample, Status, StreamInfo, TunnelState};
use std::ffi::CStr;
use std::sync::Arc;
use std::time::Duration;

/// Fixed-interval wait used while the library reports would-block.
pub trait Pacer {
    /// Block the current thread for `interval`.
    fn pause(&mut self, interval: Duration);
}

/// [`Pacer`] backed by `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Call `op` until it returns something other than would-block, pausing
/// once per would-block result. Returns the final status and the number of
/// pauses taken.
pub fn poll_while_blocked<P, F>(pacer: &mut P, interval: Duration, mut op: F) -> (Status, u64)
where
    P: Pacer + ?Sized,
    F: FnMut() -> Status,
{
    let mut polls = 0u64;
    loop {
        let status = op();
        if !status.is_would_block() {
            return (status, polls);
        }
        polls += 1;
        pacer.pause(interval);
    }
}

/// A live vendor tunnel.
///
/// Every operation takes `&mut self`; the vendor library expects one caller
/// per tunnel.
pub struct TunnelSession<'a, A: TunnelApi + ?Sized> {
    /// The vendor entry points.
    api: &'a A,

    /// Handle returned by Create.
    tunnel: TunnelHandle,

    /// Current session state.
    state: TunnelState,

    /// Would-block pauses taken on this tunnel.
    polls: u64,

    /// Successful sample reads on this tunnel.
    samples: u64,
}

impl<'a, A: TunnelApi + ?Sized> TunnelSession<'a, A> {
    /// Create a tunnel for `camera_url` and install `logger` on it.
    ///
    /// If the library hands back a handle together with a non-zero status,
    /// the handle is still torn down before the error is returned.
    pub fn create(api: &'a A, camera_url: &CStr, logger: &Arc<LogForwarder>) -> TunnelResult<Self> {
        let (status, handle) = api.create(camera_url);
        tracing::debug!(%status, has_handle = handle.is_some(), "Bambu_Create returned");

        let Some(tunnel) = handle else {
            let status = if status.is_success() { Status::ERROR } else { status };
            return Err(TunnelError::CreateFailed { status });
        };

        let session = Self {
            api,
            tunnel,
            state: TunnelState::Created,
            polls: 0,
            samples: 0,
        };

        if !status.is_success() {
            // Dropping the session closes and destroys the stray handle.
            return Err(TunnelError::CreateFailed { status });
        }

        api.set_logger(tunnel, Arc::clone(logger));
        Ok(session)
    }

    /// Get the current session state.
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Would-block pauses taken so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Successful sample reads so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Open the tunnel.
    pub fn open(&mut self) -> TunnelResult<()> {
        self.expect_state(TunnelState::Created)?;

        let status = self.api.open(self.tunnel);
        tracing::debug!(%status, "Bambu_Open returned");
        if !status.is_success() {
            return Err(TunnelError::OpenFailed { status });
        }

        self.state = TunnelState::Opened;
        Ok(())
    }

    /// Start the stream, retrying at `interval` while the library reports
    /// would-block. Returns the number of pauses taken.
    pub fn start_stream<P: Pacer + ?Sized>(
        &mut self,
        stream_type: i32,
        pacer: &mut P,
        interval: Duration,
    ) -> TunnelResult<u64> {
        self.expect_state(TunnelState::Opened)?;
        self.state = TunnelState::Negotiating;

        let (api, tunnel) = (self.api, self.tunnel);
        let (status, polls) =
            poll_while_blocked(pacer, interval, || api.start_stream(tunnel, stream_type));
        self.polls += polls;

        tracing::info!(%status, polls, "Bambu_StartStream");
        if !status.is_success() {
            return Err(TunnelError::StartStreamFailed { status });
        }
        Ok(polls)
    }

    /// Fetch metadata for stream `index` and enter the streaming state.
    pub fn stream_info(&mut self, index: i32) -> TunnelResult<StreamInfo> {
        self.expect_state(TunnelState::Negotiating)?;

        if let Some(count) = self.api.stream_count(self.tunnel) {
            tracing::debug!(count, "Bambu_GetStreamCount");
        }

        let info = self.api.stream_info(self.tunnel, index).map_err(|status| {
            tracing::info!(%status, "Bambu_GetStreamInfo");
            TunnelError::StreamInfoFailed { status }
        })?;

        tracing::info!(status = %Status::SUCCESS, "Bambu_GetStreamInfo");
        self.state = TunnelState::Streaming;
        Ok(info)
    }

    /// Read the next sample, retrying at `interval` while the library
    /// reports would-block.
    pub fn read_sample<P: Pacer + ?Sized>(
        &mut self,
        sample: &mut Sample,
        pacer: &mut P,
        interval: Duration,
    ) -> TunnelResult<()> {
        self.expect_state(TunnelState::Streaming)?;

        let (api, tunnel) = (self.api, self.tunnel);
        let (status, polls) = poll_while_blocked(pacer, interval, || api.read_sample(tunnel, sample));
        self.polls += polls;

        if !status.is_success() {
            return Err(TunnelError::ReadSampleFailed { status });
        }

        self.samples += 1;
        tracing::trace!(
            bytes = sample.len(),
            track = sample.track,
            decode_time = sample.decode_time,
            "Bambu_ReadSample"
        );
        Ok(())
    }

    /// Close and destroy the tunnel.
    ///
    /// This is called automatically on drop, but can be called explicitly
    /// to release the tunnel at a known point.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.state.holds_handle() {
            return;
        }

        self.api.close(self.tunnel);
        self.api.destroy(self.tunnel);
        self.state = TunnelState::Closed;

        tracing::debug!(
            tunnel = self.tunnel.addr(),
            samples = self.samples,
            polls = self.polls,
            "Tunnel closed and destroyed"
        );
    }

    fn expect_state(&self, expected: TunnelState) -> TunnelResult<()> {
        if self.state != expected {
            return Err(TunnelError::invalid_state(expected, self.state));
        }
        Ok(())
    }
}

impl<A: TunnelApi + ?Sized> Drop for TunnelSession<'_, A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeTunnelApi, Read, RecordingPacer, SharedBuffer};
    use std::ffi::CString;

    const URL: &str = "bambu:///local/10.0.0.2.?port=6000&user=bblp&passwd=secret";

    fn logger() -> Arc<LogForwarder> {
        Arc::new(LogForwarder::new(1, Box::new(SharedBuffer::new())))
    }

    fn url() -> CString {
        CString::new(URL).unwrap()
    }

    #[test]
    fn test_poll_counts_one_pause_per_would_block() {
        let mut pacer = RecordingPacer::default();
        let mut script = vec![Status(0), Status(2), Status(2), Status(2)];
        let (status, polls) =
            poll_while_blocked(&mut pacer, Duration::from_millis(100), || script.pop().unwrap());

        assert!(status.is_success());
        assert_eq!(polls, 3);
        assert_eq!(pacer.pauses(), vec![Duration::from_millis(100); 3]);
    }

    #[test]
    fn test_create_failure_without_handle_skips_teardown() {
        let api = FakeTunnelApi::builder().create_null([Status(2)]).build();

        let result = TunnelSession::create(&api, &url(), &logger());
        assert!(matches!(
            result,
            Err(TunnelError::CreateFailed { status: Status(2) })
        ));
        assert_eq!(api.calls(), vec![Call::Create(URL.to_string())]);
    }

    #[test]
    fn test_create_failure_with_handle_tears_down() {
        let api = FakeTunnelApi::builder().create([Status(7)]).build();

        let result = TunnelSession::create(&api, &url(), &logger());
        assert!(matches!(result, Err(TunnelError::CreateFailed { .. })));
        assert_eq!(
            api.calls(),
            vec![Call::Create(URL.to_string()), Call::Close(1), Call::Destroy(1)]
        );
    }

    #[test]
    fn test_drop_closes_once() {
        let api = FakeTunnelApi::builder().create([Status(0)]).open([Status(0)]).build();

        {
            let mut session = TunnelSession::create(&api, &url(), &logger()).unwrap();
            session.open().unwrap();
            assert_eq!(session.state(), TunnelState::Opened);
        }

        assert_eq!(
            api.calls(),
            vec![
                Call::Create(URL.to_string()),
                Call::SetLogger(1),
                Call::Open(1),
                Call::Close(1),
                Call::Destroy(1),
            ]
        );
    }

    #[test]
    fn test_open_failure_is_reported() {
        let api = FakeTunnelApi::builder().create([Status(0)]).open([Status(-1)]).build();

        let mut session = TunnelSession::create(&api, &url(), &logger()).unwrap();
        let err = session.open().unwrap_err();
        assert!(matches!(err, TunnelError::OpenFailed { status: Status(-1) }));
        session.close();

        assert_eq!(api.count(|c| matches!(c, Call::Close(_))), 1);
        assert_eq!(api.count(|c| matches!(c, Call::Destroy(_))), 1);
    }

    #[test]
    fn test_start_stream_retries_while_blocked() {
        let api = FakeTunnelApi::builder()
            .create([Status(0)])
            .open([Status(0)])
            .start_stream([Status(2), Status(2), Status(0)])
            .build();
        let mut pacer = RecordingPacer::default();

        let mut session = TunnelSession::create(&api, &url(), &logger()).unwrap();
        session.open().unwrap();
        let polls = session
            .start_stream(0x3000, &mut pacer, Duration::from_millis(100))
            .unwrap();

        assert_eq!(polls, 2);
        assert_eq!(pacer.pauses().len(), 2);
        assert_eq!(api.count(|c| *c == Call::StartStream(1, 0x3000)), 3);
    }

    #[test]
    fn test_samples_count_successful_reads_only() {
        let api = FakeTunnelApi::builder()
            .create([Status(0)])
            .open([Status(0)])
            .start_stream([Status(0)])
            .stream_info([Status(0)])
            .reads([
                Read::Sample(vec![0, 0, 0, 1]),
                Read::Status(Status::WOULD_BLOCK),
                Read::Sample(vec![0x65]),
                Read::Status(Status(5)),
            ])
            .build();
        let mut pacer = RecordingPacer::default();
        let interval = Duration::from_millis(100);

        let mut session = TunnelSession::create(&api, &url(), &logger()).unwrap();
        session.open().unwrap();
        session.start_stream(0x3000, &mut pacer, interval).unwrap();
        session.stream_info(0).unwrap();

        let mut sample = Sample::new();
        session.read_sample(&mut sample, &mut pacer, interval).unwrap();
        session.read_sample(&mut sample, &mut pacer, interval).unwrap();
        assert_eq!(sample.as_bytes(), &[0x65]);

        let err = session.read_sample(&mut sample, &mut pacer, interval).unwrap_err();
        assert_eq!(err.status(), Some(Status(5)));
        assert_eq!(session.samples(), 2);
        assert_eq!(session.polls(), 1);
    }

    #[test]
    fn test_read_before_negotiation_is_rejected() {
        let api = FakeTunnelApi::builder().create([Status(0)]).build();
        let mut session = TunnelSession::create(&api, &url(), &logger()).unwrap();
        let mut sample = Sample::new();

        let err = session
            .read_sample(&mut sample, &mut RecordingPacer::default(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            TunnelError::InvalidState {
                expected: TunnelState::Streaming,
                actual: TunnelState::Created,
            }
        ));
    }
}
