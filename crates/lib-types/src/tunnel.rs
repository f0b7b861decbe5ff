//! Tunnel session types.
//!
//! These types describe the values exchanged with a vendor tunnel library:
//! status codes, negotiated stream metadata, media samples and the session
//! state machine driven by the stream driver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code returned by every fallible vendor entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i32);

impl Status {
    /// The call completed.
    pub const SUCCESS: Status = Status(0);

    /// The call could not complete yet and should be retried.
    pub const WOULD_BLOCK: Status = Status(2);

    /// Generic failure reported by the vendor library.
    pub const ERROR: Status = Status(4);

    /// Raw integer code.
    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn is_would_block(self) -> bool {
        self == Self::WOULD_BLOCK
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "0 (success)"),
            Self::WOULD_BLOCK => write!(f, "2 (would block)"),
            Self(code) => write!(f, "{}", code),
        }
    }
}

/// Stream type requesting the camera video stream from StartStreamEx.
pub const CAMERA_STREAM_TYPE: i32 = 0x3000;

/// Metadata of a negotiated stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream format tag.
    pub stream_type: u32,

    /// Stream sub-type tag.
    pub sub_type: i32,

    pub width: i32,
    pub height: i32,
    pub frame_rate: i32,
    pub format_type: i32,
    pub format_size: i32,

    /// Largest sample the library announced it may produce.
    pub max_frame_size: i32,
}

/// One encoded media sample copied out of the vendor library.
///
/// The buffer is reused between reads so a steady stream does not
/// reallocate once it has seen its largest frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    /// Track index the sample belongs to.
    pub track: i32,

    /// Vendor-defined sample flags.
    pub flags: i32,

    /// Decode timestamp as reported by the library.
    pub decode_time: u64,

    data: Vec<u8>,
}

impl Sample {
    /// Create an empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the payload, keeping the existing allocation.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Tunnel session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// No tunnel exists yet.
    Idle,
    /// Create returned a handle.
    Created,
    /// Open completed.
    Opened,
    /// Stream start and metadata fetch in progress.
    Negotiating,
    /// Samples are being read.
    Streaming,
    /// Close and Destroy have been issued.
    Closed,
}

impl TunnelState {
    /// Whether the vendor handle is still live in this state.
    pub fn holds_handle(self) -> bool {
        !matches!(self, Self::Idle | Self::Closed)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Created => "created",
            Self::Opened => "opened",
            Self::Negotiating => "negotiating",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status::SUCCESS.is_would_block());
        assert!(Status(2).is_would_block());
        assert!(!Status(5).is_success());
        assert!(!Status(5).is_would_block());
        assert_eq!(Status::from(-1).code(), -1);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::SUCCESS.to_string(), "0 (success)");
        assert_eq!(Status::WOULD_BLOCK.to_string(), "2 (would block)");
        assert_eq!(Status(5).to_string(), "5");
    }

    #[test]
    fn test_status_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Status(5)).unwrap(), "5");
        let parsed: Status = serde_json::from_str("2").unwrap();
        assert!(parsed.is_would_block());
    }

    #[test]
    fn test_sample_reuses_buffer() {
        let mut sample = Sample::new();
        sample.fill(&[1, 2, 3, 4]);
        assert_eq!(sample.as_bytes(), &[1, 2, 3, 4]);

        sample.fill(&[9]);
        assert_eq!(sample.len(), 1);
        assert_eq!(sample.as_bytes(), &[9]);

        sample.fill(&[]);
        assert!(sample.is_empty());
    }

    #[test]
    fn test_state_holds_handle() {
        assert!(!TunnelState::Idle.holds_handle());
        assert!(TunnelState::Created.holds_handle());
        assert!(TunnelState::Streaming.holds_handle());
        assert!(!TunnelState::Closed.holds_handle());
    }
}
