//! Error types for tunnel FFI operations.

use lib_types::{Status, TunnelState};
use thiserror::Error;

/// Errors that can occur while loading or driving a tunnel library.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Failed to load the shared library.
    #[error("Failed to load library '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: libloading::Error,
    },

    /// Required symbol not found in library.
    #[error("Symbol '{symbol}' not found in library")]
    SymbolNotFound { symbol: String },

    /// Invalid parameter.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Create returned a non-zero status.
    #[error("Bambu_Create failed with status {status}")]
    CreateFailed { status: Status },

    /// Open returned a non-zero status.
    #[error("Bambu_Open failed with status {status}")]
    OpenFailed { status: Status },

    /// StartStreamEx returned something other than success or would-block.
    #[error("Bambu_StartStreamEx failed with status {status}")]
    StartStreamFailed { status: Status },

    /// GetStreamInfo returned a non-zero status.
    #[error("Bambu_GetStreamInfo failed with status {status}")]
    StreamInfoFailed { status: Status },

    /// ReadSample returned something other than success or would-block.
    #[error("Bambu_ReadSample failed with status {status}")]
    ReadSampleFailed { status: Status },

    /// Writing a sample to the output sink failed.
    #[error("Failed to write sample to output: {0}")]
    Sink(#[from] std::io::Error),

    /// Invalid session state for operation.
    #[error("Invalid tunnel state: expected {expected}, got {actual}")]
    InvalidState {
        expected: TunnelState,
        actual: TunnelState,
    },
}

impl TunnelError {
    /// Create a load error.
    pub fn load_error(path: impl Into<String>, source: libloading::Error) -> Self {
        Self::LoadError {
            path: path.into(),
            source,
        }
    }

    /// Create a symbol not found error.
    pub fn symbol_not_found(symbol: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            symbol: symbol.into(),
        }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: TunnelState, actual: TunnelState) -> Self {
        Self::InvalidState { expected, actual }
    }

    /// Vendor status carried by this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::CreateFailed { status }
            | Self::OpenFailed { status }
            | Self::StartStreamFailed { status }
            | Self::StreamInfoFailed { status }
            | Self::ReadSampleFailed { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether the driver recovers from this error by restarting the episode.
    pub fn is_episode_error(&self) -> bool {
        matches!(
            self,
            Self::StartStreamFailed { .. }
                | Self::StreamInfoFailed { .. }
                | Self::ReadSampleFailed { .. }
        )
    }

    /// Whether this error ends the process.
    pub fn is_fatal(&self) -> bool {
        !self.is_episode_error()
    }
}

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_errors_are_recoverable() {
        let status = Status(5);
        assert!(TunnelError::StartStreamFailed { status }.is_episode_error());
        assert!(TunnelError::StreamInfoFailed { status }.is_episode_error());
        assert!(TunnelError::ReadSampleFailed { status }.is_episode_error());
    }

    #[test]
    fn test_tunnel_setup_errors_are_fatal() {
        assert!(TunnelError::CreateFailed { status: Status(2) }.is_fatal());
        assert!(TunnelError::OpenFailed { status: Status(-1) }.is_fatal());
        assert!(TunnelError::symbol_not_found("Bambu_Open").is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert!(TunnelError::from(io).is_fatal());
    }

    #[test]
    fn test_status_accessor() {
        let err = TunnelError::ReadSampleFailed { status: Status(5) };
        assert_eq!(err.status(), Some(Status(5)));
        assert_eq!(err.to_string(), "Bambu_ReadSample failed with status 5");
        assert_eq!(TunnelError::invalid_parameter("camera_url", "nul").status(), None);
    }
}
