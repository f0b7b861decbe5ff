//! Stream orchestration.

use crate::config::StreamConfig;
use crate::output;
use anyhow::{Context, Result};
use lib_tunnel_ffi::{StreamDriver, TunnelApi, TunnelError, TunnelLibrary};
use lib_types::CameraUrl;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

/// Fatal tunnel or sink failure while streaming.
pub const EXIT_STREAM_FAILURE: u8 = 1;
/// Bad command line. Clap uses the same code for its own usage errors.
pub const EXIT_USAGE: u8 = 2;
/// The tunnel library could not be loaded.
pub const EXIT_LIBRARY_LOAD: u8 = 3;
/// A required entry point is missing from the library.
pub const EXIT_LIBRARY_SYMBOL: u8 = 4;
/// Configuration or output setup failed.
pub const EXIT_SETUP: u8 = 5;

/// Stream orchestrator.
pub struct Orchestrator {
    config: StreamConfig,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    /// Load the tunnel library at `library` and stream from `camera_url`.
    ///
    /// Only returns on failure.
    pub fn run(&self, library: &Path, camera_url: CameraUrl) -> Result<Infallible> {
        tracing::info!("Loading tunnel library from {:?}", library);
        let library = TunnelLibrary::load(library)?;
        self.drive(library, camera_url)
    }

    /// Stream from `camera_url` through an already loaded library.
    pub fn drive<A: TunnelApi>(&self, api: A, camera_url: CameraUrl) -> Result<Infallible> {
        let target = &self.config.output.target;
        let sink = output::open_sink(target)?;
        let logger = Arc::new(output::log_forwarder(
            target,
            self.config.logging.max_forwarded_level,
        ));

        let mut driver = StreamDriver::new(api, camera_url, sink, logger)?
            .with_config(self.config.driver_config());

        let result = driver.run();

        let stats = driver.stats();
        tracing::info!(
            episodes = stats.episodes,
            samples = stats.samples,
            bytes = stats.bytes,
            polls = stats.polls,
            "Stream driver stopped"
        );

        match result {
            Ok(never) => match never {},
            Err(e) => Err(e).context("Streaming failed"),
        }
    }
}

/// Map a failure to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    let tunnel_error = err.chain().find_map(|e| e.downcast_ref::<TunnelError>());
    match tunnel_error {
        Some(TunnelError::LoadError { .. }) => EXIT_LIBRARY_LOAD,
        Some(TunnelError::SymbolNotFound { .. }) => EXIT_LIBRARY_SYMBOL,
        Some(TunnelError::InvalidParameter { .. }) => EXIT_USAGE,
        Some(_) => EXIT_STREAM_FAILURE,
        None => EXIT_SETUP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputTarget;
    use lib_tunnel_ffi::fake::{Call, FakeTunnelApi, Read};
    use lib_types::Status;

    const URL: &str = "bambu:///local/10.0.0.2.?port=6000&user=bblp&passwd=secret";

    fn file_config(path: &Path) -> StreamConfig {
        let mut config = StreamConfig::default();
        config.output.target = OutputTarget::File { path: path.to_path_buf() };
        config.stream.poll_interval_ms = 1;
        config
    }

    #[test]
    fn test_drive_writes_samples_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.h264");
        let api = FakeTunnelApi::builder()
            .create([Status(0)])
            .open([Status(0)])
            .start_stream([Status(2), Status(0)])
            .stream_info([Status(0)])
            .reads([
                Read::Sample(vec![0, 0, 0, 1]),
                Read::Status(Status::WOULD_BLOCK),
                Read::Sample(vec![0x65, 0x88]),
                Read::Status(Status(5)),
            ])
            .build();

        let err = Orchestrator::new(file_config(&path))
            .drive(&api, CameraUrl::from(URL))
            .unwrap_err();

        assert_eq!(exit_code(&err), EXIT_STREAM_FAILURE);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 0, 1, 0x65, 0x88]);
        assert_eq!(api.count(|c| matches!(c, Call::Create(_))), 2);
        assert_eq!(api.count(|c| matches!(c, Call::Destroy(_))), 1);
    }

    #[test]
    fn test_create_failure_exits_without_open() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeTunnelApi::builder().create_null([Status(2)]).build();

        let err = Orchestrator::new(file_config(&dir.path().join("out.bin")))
            .drive(&api, CameraUrl::from(URL))
            .unwrap_err();

        assert_eq!(exit_code(&err), EXIT_STREAM_FAILURE);
        assert_eq!(api.calls(), vec![Call::Create(URL.to_string())]);
    }

    #[test]
    fn test_missing_library_maps_to_load_exit_code() {
        let err = Orchestrator::new(StreamConfig::default())
            .run(Path::new("/nonexistent/libBambuSource.so"), CameraUrl::from(URL))
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_LIBRARY_LOAD);
    }

    #[test]
    fn test_exit_codes() {
        let symbol = anyhow::Error::new(TunnelError::symbol_not_found("Bambu_Open"));
        assert_eq!(exit_code(&symbol), EXIT_LIBRARY_SYMBOL);

        let usage = anyhow::Error::new(TunnelError::invalid_parameter("camera_url", "nul"));
        assert_eq!(exit_code(&usage), EXIT_USAGE);

        let config = anyhow::anyhow!("stream.poll_interval_ms must be greater than zero");
        assert_eq!(exit_code(&config), EXIT_SETUP);
    }
}
