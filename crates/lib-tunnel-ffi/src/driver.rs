//! The stream driver.
//!
//! [`StreamDriver`] runs episodes back to back. An episode creates and opens
//! a tunnel, negotiates the stream, then copies samples to the sink until
//! the library reports a failure, at which point the tunnel is torn down and
//! a fresh one is created. Only a failed Create or Open, or a broken sink,
//! ends the run.

use crate::api::TunnelApi;
use crate::error::{TunnelError, TunnelResult};
use crate::lifecycle::{Pacer, ThreadPacer, TunnelSession};
use crate::logbridge::LogForwarder;
use lib_types::{CameraUrl, Sample, Status, CAMERA_STREAM_TYPE};
use std::convert::Infallible;
use std::ffi::CString;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Interval between retries while the library reports would-block.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stream negotiation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// Value passed to StartStreamEx.
    pub stream_type: i32,

    /// Stream index queried with GetStreamInfo.
    pub stream_index: i32,

    /// Fixed retry interval for would-block statuses.
    pub poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            stream_type: CAMERA_STREAM_TYPE,
            stream_index: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Counters accumulated across episodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Episodes started (one per Create call).
    pub episodes: u64,

    /// Samples forwarded to the sink.
    pub samples: u64,

    /// Bytes forwarded to the sink.
    pub bytes: u64,

    /// Would-block pauses taken.
    pub polls: u64,
}

/// Drives a tunnel library and forwards its samples to `W`.
pub struct StreamDriver<A: TunnelApi, W: Write, P: Pacer = ThreadPacer> {
    api: A,
    camera_url: CameraUrl,
    camera_url_c: CString,
    sink: W,
    pacer: P,
    config: DriverConfig,
    logger: Arc<LogForwarder>,
    stats: DriverStats,
}

impl<A: TunnelApi, W: Write> StreamDriver<A, W, ThreadPacer> {
    /// Create a driver that sleeps between would-block retries.
    ///
    /// Fails with [`TunnelError::InvalidParameter`] if the camera address
    /// contains a NUL byte.
    pub fn new(
        api: A,
        camera_url: CameraUrl,
        sink: W,
        logger: Arc<LogForwarder>,
    ) -> TunnelResult<Self> {
        let camera_url_c = CString::new(camera_url.as_str())
            .map_err(|_| TunnelError::invalid_parameter("camera_url", "contains a NUL byte"))?;

        Ok(Self {
            api,
            camera_url,
            camera_url_c,
            sink,
            pacer: ThreadPacer,
            config: DriverConfig::default(),
            logger,
            stats: DriverStats::default(),
        })
    }
}

impl<A: TunnelApi, W: Write, P: Pacer> StreamDriver<A, W, P> {
    /// Replace the retry pacer.
    pub fn with_pacer<Q: Pacer>(self, pacer: Q) -> StreamDriver<A, W, Q> {
        StreamDriver {
            api: self.api,
            camera_url: self.camera_url,
            camera_url_c: self.camera_url_c,
            sink: self.sink,
            pacer,
            config: self.config,
            logger: self.logger,
            stats: self.stats,
        }
    }

    /// Replace the negotiation parameters.
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Run episodes until one fails unrecoverably.
    ///
    /// Never returns `Ok`. The error is a failed Create or Open
    /// ([`TunnelError::CreateFailed`], [`TunnelError::OpenFailed`]) or a
    /// sink failure. The tunnel involved has already been torn down.
    pub fn run(&mut self) -> TunnelResult<Infallible> {
        tracing::info!(camera = %self.camera_url, "Starting stream driver");

        let Self {
            api,
            camera_url_c,
            sink,
            pacer,
            config,
            logger,
            stats,
            ..
        } = self;

        loop {
            stats.episodes += 1;
            let episode = stats.episodes;

            let mut session = TunnelSession::create(&*api, camera_url_c, logger)?;
            session.open()?;

            let end = match stream_episode(&mut session, sink, pacer, config, stats) {
                Ok(never) => match never {},
                Err(e) => e,
            };
            stats.polls += session.polls();
            let episode_samples = session.samples();
            session.close();

            let status = end.status().map(Status::code);
            if end.is_fatal() {
                tracing::error!(episode, status, error = %end, "Streaming stopped");
                return Err(end);
            }

            tracing::warn!(
                episode,
                status,
                error = %end,
                episode_samples,
                samples = stats.samples,
                bytes = stats.bytes,
                "Episode ended, reinit everything"
            );
        }
    }
}

/// Negotiate the stream and pump samples until something fails.
fn stream_episode<A, W, P>(
    session: &mut TunnelSession<'_, A>,
    sink: &mut W,
    pacer: &mut P,
    config: &DriverConfig,
    stats: &mut DriverStats,
) -> TunnelResult<Infallible>
where
    A: TunnelApi + ?Sized,
    W: Write,
    P: Pacer,
{
    session.start_stream(config.stream_type, pacer, config.poll_interval)?;

    let info = session.stream_info(config.stream_index)?;
    tracing::info!(
        format = info.stream_type,
        sub_type = info.sub_type,
        width = info.width,
        height = info.height,
        frame_rate = info.frame_rate,
        "Stream negotiated"
    );

    let mut sample = Sample::new();
    loop {
        session.read_sample(&mut sample, pacer, config.poll_interval)?;

        // Each sample is fully flushed before the next read.
        sink.write_all(sample.as_bytes())?;
        sink.flush()?;

        stats.samples += 1;
        stats.bytes += sample.len() as u64;
    }
}
