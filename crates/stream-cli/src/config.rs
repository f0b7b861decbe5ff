//! Stream configuration loading and validation.

use anyhow::{Context, Result};
use lib_tunnel_ffi::{DriverConfig, DEFAULT_MAX_FORWARDED_LEVEL};
use lib_types::CAMERA_STREAM_TYPE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream negotiation parameters.
    #[serde(default)]
    pub stream: StreamParams,

    /// Vendor log forwarding.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where samples go.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Stream negotiation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    /// Value passed to StartStreamEx.
    #[serde(default = "default_stream_type")]
    pub stream_type: i32,

    /// Stream index queried with GetStreamInfo.
    #[serde(default)]
    pub stream_index: i32,

    /// Retry interval while the library reports would-block.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_stream_type() -> i32 { CAMERA_STREAM_TYPE }
fn default_poll_interval_ms() -> u64 { 100 }

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            stream_type: default_stream_type(),
            stream_index: 0,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Vendor log forwarding configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Highest vendor severity written to the diagnostic stream
    /// (0 = fatal, 1 = error, larger is more verbose).
    #[serde(default = "default_max_forwarded_level")]
    pub max_forwarded_level: i32,
}

fn default_max_forwarded_level() -> i32 { DEFAULT_MAX_FORWARDED_LEVEL }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_forwarded_level: default_max_forwarded_level(),
        }
    }
}

/// Sample sink selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputTarget {
    /// Standard error, as the original tool did.
    #[default]
    Stderr,
    /// Standard output. Diagnostics move to stderr.
    Stdout,
    /// A file, truncated on start.
    File {
        path: PathBuf,
    },
}

/// Output configuration.
///
/// # Examples
///
/// ```toml
/// [output.target]
/// type = "file"
/// path = "camera.h264"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub target: OutputTarget,
}

impl StreamConfig {
    /// Driver parameters derived from this configuration.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            stream_type: self.stream.stream_type,
            stream_index: self.stream.stream_index,
            poll_interval: Duration::from_millis(self.stream.poll_interval_ms),
        }
    }

    /// Whether diagnostics must stay off stdout because samples use it.
    pub fn samples_on_stdout(&self) -> bool {
        self.output.target == OutputTarget::Stdout
    }
}

/// Load configuration from a file.
pub fn load_config(path: &Path) -> Result<StreamConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: StreamConfig = if path.extension().map_or(false, |e| e == "json") {
        serde_json::from_str(&content)
            .with_context(|| "Failed to parse config as JSON")?
    } else {
        // Assume TOML
        toml::from_str(&content)
            .with_context(|| "Failed to parse config as TOML")?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration.
pub fn validate_config(config: &StreamConfig) -> Result<()> {
    if config.stream.poll_interval_ms == 0 {
        anyhow::bail!("stream.poll_interval_ms must be greater than zero");
    }

    if config.stream.stream_index < 0 {
        anyhow::bail!(
            "stream.stream_index must not be negative (got {})",
            config.stream.stream_index
        );
    }

    if config.logging.max_forwarded_level < 0 {
        anyhow::bail!(
            "logging.max_forwarded_level must not be negative (got {})",
            config.logging.max_forwarded_level
        );
    }

    if let OutputTarget::File { path } = &config.output.target {
        if path.as_os_str().is_empty() {
            anyhow::bail!("output.target.path must not be empty");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_original_tool() {
        let config = StreamConfig::default();
        let driver = config.driver_config();
        assert_eq!(driver.stream_type, 0x3000);
        assert_eq!(driver.stream_index, 0);
        assert_eq!(driver.poll_interval, Duration::from_millis(100));
        assert_eq!(config.logging.max_forwarded_level, 1);
        assert_eq!(config.output.target, OutputTarget::Stderr);
        assert!(!config.samples_on_stdout());
    }

    #[test]
    fn test_load_toml_with_partial_sections() {
        let file = write_config(
            ".toml",
            r#"
            [stream]
            poll_interval_ms = 250

            [output.target]
            type = "file"
            path = "camera.h264"
            "#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.stream.poll_interval_ms, 250);
        assert_eq!(config.stream.stream_type, 0x3000);
        assert_eq!(
            config.output.target,
            OutputTarget::File { path: PathBuf::from("camera.h264") }
        );
    }

    #[test]
    fn test_load_json() {
        let file = write_config(
            ".json",
            r#"{"logging": {"max_forwarded_level": 3}, "output": {"target": {"type": "stdout"}}}"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.logging.max_forwarded_level, 3);
        assert!(config.samples_on_stdout());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let file = write_config(".toml", "[stream]\npoll_interval_ms = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_negative_stream_index_is_rejected() {
        let mut config = StreamConfig::default();
        config.stream.stream_index = -1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/stream.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
